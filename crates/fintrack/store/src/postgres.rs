//! PostgreSQL backend
//!
//! Every store address is a database URL. A connection is a `PgPool`; the
//! schema for the store's role is created as part of connecting.

use async_trait::async_trait;
use chrono::{DateTime, Duration as TtlDuration, Utc};
use fintrack_types::{
    normalize_email, AccountId, AccountRecord, AccountRole, EntryId, EntryKind, LedgerEntry,
    LedgerTotals, NewAccount, Principal, ProfileUpdate, SessionToken, TenantId, Verification,
    VerificationError, DEFAULT_PROFILE_IMAGE,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connector::Connector;
use crate::credential::{session_key, verification_code, CredentialDigest};
use crate::error::{StoreError, StoreResult};
use crate::traits::{AccountStore, IssuedAccount, IssuedSession, QueryWindow, TenantLedger};
use crate::TENANT_ID_ATTEMPTS;

/// Which tables a connection needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaRole {
    Master,
    Tenant,
}

/// Opens `PgPool`s for one store role
#[derive(Debug, Clone)]
pub struct PgConnector {
    role: SchemaRole,
    max_connections: u32,
    acquire_timeout: Duration,
}

impl PgConnector {
    pub fn new(role: SchemaRole, max_connections: u32, acquire_timeout: Duration) -> Self {
        Self {
            role,
            max_connections,
            acquire_timeout,
        }
    }

    pub fn master(max_connections: u32, acquire_timeout: Duration) -> Self {
        Self::new(SchemaRole::Master, max_connections, acquire_timeout)
    }

    pub fn tenant(max_connections: u32, acquire_timeout: Duration) -> Self {
        Self::new(SchemaRole::Tenant, max_connections, acquire_timeout)
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Connection = PgStore;

    async fn connect(&self, address: &str) -> StoreResult<PgStore> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(address)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = PgStore { pool };
        if let Err(err) = store.initialize_schema(self.role).await {
            store.pool.close().await;
            return Err(StoreError::Connection(err.detail()));
        }
        Ok(store)
    }

    fn is_healthy(&self, connection: &PgStore) -> bool {
        !connection.pool.is_closed()
    }

    async fn close(&self, connection: PgStore) {
        connection.pool.close().await;
    }
}

/// A pooled connection to one Postgres database
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn initialize_schema(&self, role: SchemaRole) -> StoreResult<()> {
        let statements: &[&str] = match role {
            SchemaRole::Master => &[
                r#"
                CREATE TABLE IF NOT EXISTS accounts (
                    id UUID PRIMARY KEY,
                    full_name TEXT NOT NULL,
                    email TEXT NOT NULL,
                    phone_number TEXT NOT NULL,
                    credential_salt TEXT NOT NULL,
                    credential_digest TEXT NOT NULL,
                    role TEXT NOT NULL,
                    tenant_id TEXT NOT NULL UNIQUE,
                    verified BOOLEAN NOT NULL DEFAULT FALSE,
                    verification_code TEXT,
                    code_expires_at TIMESTAMPTZ,
                    profile_image TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL,
                    retired_at TIMESTAMPTZ
                );
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS sessions (
                    token_digest TEXT PRIMARY KEY,
                    account_id UUID NOT NULL REFERENCES accounts(id),
                    expires_at TIMESTAMPTZ NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL
                );
                "#,
                r#"CREATE INDEX IF NOT EXISTS sessions_account_id ON sessions(account_id);"#,
                r#"CREATE UNIQUE INDEX IF NOT EXISTS accounts_email_key ON accounts(email) WHERE retired_at IS NULL;"#,
                r#"CREATE UNIQUE INDEX IF NOT EXISTS accounts_phone_number_key ON accounts(phone_number) WHERE retired_at IS NULL;"#,
            ],
            SchemaRole::Tenant => &[
                r#"
                CREATE TABLE IF NOT EXISTS ledger_entries (
                    id UUID PRIMARY KEY,
                    kind TEXT NOT NULL,
                    title TEXT NOT NULL,
                    amount_minor BIGINT NOT NULL CHECK (amount_minor > 0),
                    category TEXT NOT NULL,
                    description TEXT,
                    occurred_at TIMESTAMPTZ NOT NULL,
                    created_by UUID NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL
                );
                "#,
                r#"CREATE INDEX IF NOT EXISTS ledger_entries_occurred_at ON ledger_entries(occurred_at DESC);"#,
            ],
        };

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx)?;
        }
        Ok(())
    }
}

const ACCOUNT_COLUMNS: &str = "id, full_name, email, phone_number, role, tenant_id, verified, \
     verification_code, code_expires_at, profile_image, created_at, updated_at";

fn row_to_account(row: &PgRow) -> StoreResult<AccountRecord> {
    let role: String = row.try_get("role").map_err(map_sqlx)?;
    let tenant_id: String = row.try_get("tenant_id").map_err(map_sqlx)?;
    Ok(AccountRecord {
        id: AccountId::from_uuid(row.try_get("id").map_err(map_sqlx)?),
        full_name: row.try_get("full_name").map_err(map_sqlx)?,
        email: row.try_get("email").map_err(map_sqlx)?,
        phone_number: row.try_get("phone_number").map_err(map_sqlx)?,
        role: role
            .parse::<AccountRole>()
            .map_err(|e| StoreError::Query(e.to_string()))?,
        tenant_id: TenantId::new(tenant_id).map_err(|e| StoreError::Query(e.to_string()))?,
        verification: Verification::from_parts(
            row.try_get("verified").map_err(map_sqlx)?,
            row.try_get("verification_code").map_err(map_sqlx)?,
            row.try_get("code_expires_at").map_err(map_sqlx)?,
        ),
        profile_image: row.try_get("profile_image").map_err(map_sqlx)?,
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
        updated_at: row.try_get("updated_at").map_err(map_sqlx)?,
    })
}

fn row_to_entry(row: &PgRow) -> StoreResult<LedgerEntry> {
    let kind: String = row.try_get("kind").map_err(map_sqlx)?;
    Ok(LedgerEntry {
        id: EntryId::from_uuid(row.try_get("id").map_err(map_sqlx)?),
        kind: kind
            .parse::<EntryKind>()
            .map_err(|e| StoreError::Query(e.to_string()))?,
        title: row.try_get("title").map_err(map_sqlx)?,
        amount_minor: row.try_get("amount_minor").map_err(map_sqlx)?,
        category: row.try_get("category").map_err(map_sqlx)?,
        description: row.try_get("description").map_err(map_sqlx)?,
        occurred_at: row.try_get("occurred_at").map_err(map_sqlx)?,
        created_by: AccountId::from_uuid(row.try_get("created_by").map_err(map_sqlx)?),
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
    })
}

#[async_trait]
impl AccountStore for PgStore {
    async fn create_account(
        &self,
        account: NewAccount,
        code_ttl: TtlDuration,
    ) -> StoreResult<IssuedAccount> {
        let account = account.normalized()?;
        let credential = CredentialDigest::derive(&account.credential);

        for _ in 0..TENANT_ID_ATTEMPTS {
            let now = Utc::now();
            let code = verification_code();
            let record = AccountRecord {
                id: AccountId::generate(),
                full_name: account.full_name.clone(),
                email: account.email.clone(),
                phone_number: account.phone_number.clone(),
                role: account.role,
                tenant_id: TenantId::generate(account.role),
                verification: Verification::pending(code.clone(), code_ttl, now),
                profile_image: DEFAULT_PROFILE_IMAGE.to_string(),
                created_at: now,
                updated_at: now,
            };

            let inserted = sqlx::query(
                r#"
                INSERT INTO accounts (
                    id, full_name, email, phone_number, credential_salt, credential_digest,
                    role, tenant_id, verified, verification_code, code_expires_at,
                    profile_image, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, $9, $10, $11, $12, $12)
                "#,
            )
            .bind(record.id.as_uuid())
            .bind(&record.full_name)
            .bind(&record.email)
            .bind(&record.phone_number)
            .bind(credential.salt())
            .bind(credential.digest())
            .bind(record.role.as_str())
            .bind(record.tenant_id.as_str())
            .bind(&code)
            .bind(record.verification.code_expires_at())
            .bind(&record.profile_image)
            .bind(now)
            .execute(&self.pool)
            .await;

            match inserted {
                Ok(_) => {
                    debug!(account = %record.id, tenant = %record.tenant_id, "account created");
                    return Ok(IssuedAccount {
                        record,
                        verification_code: code,
                    });
                }
                Err(sqlx::Error::Database(db_err))
                    if db_err.constraint() == Some("accounts_tenant_id_key") =>
                {
                    warn!(tenant = %record.tenant_id, "tenant id collision, regenerating");
                }
                Err(err) => return Err(map_account_conflict(err)),
            }
        }

        Err(StoreError::Conflict(
            "could not allocate a tenant id".to_string(),
        ))
    }

    async fn find_account(&self, id: &AccountId) -> StoreResult<Option<AccountRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 AND retired_at IS NULL"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<AccountRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1 AND retired_at IS NULL"
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn authenticate(
        &self,
        email: &str,
        credential: &str,
    ) -> StoreResult<Option<AccountRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS}, credential_salt, credential_digest \
             FROM accounts WHERE email = $1 AND retired_at IS NULL"
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let digest = CredentialDigest::from_parts(
            row.try_get("credential_salt").map_err(map_sqlx)?,
            row.try_get("credential_digest").map_err(map_sqlx)?,
        );
        if !digest.matches(credential) {
            return Ok(None);
        }
        row_to_account(&row).map(Some)
    }

    async fn verify_account(
        &self,
        email: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<AccountRecord> {
        let email = normalize_email(email);
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
             WHERE email = $1 AND retired_at IS NULL FOR UPDATE"
        ))
        .bind(&email)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?
        .ok_or_else(|| StoreError::NotFound(format!("account {email}")))?;
        let mut record = row_to_account(&row)?;

        let outcome = record.verification.consume(code, now);
        if matches!(outcome, Ok(()) | Err(VerificationError::Expired)) {
            record.updated_at = now;
            sqlx::query(
                r#"
                UPDATE accounts
                SET verified = $2, verification_code = $3, code_expires_at = $4, updated_at = $5
                WHERE id = $1
                "#,
            )
            .bind(record.id.as_uuid())
            .bind(record.verification.is_verified())
            .bind(record.verification.pending_code())
            .bind(record.verification.code_expires_at())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
            tx.commit().await.map_err(map_sqlx)?;
        }

        outcome?;
        Ok(record)
    }

    async fn update_profile(
        &self,
        id: &AccountId,
        update: ProfileUpdate,
    ) -> StoreResult<AccountRecord> {
        if update.is_empty() {
            return Err(StoreError::InvalidInput("nothing to update".to_string()));
        }

        let mut record = self
            .find_account(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))?;
        update.apply(&mut record, Utc::now());

        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET full_name = $2, phone_number = $3, profile_image = $4, updated_at = $5
            WHERE id = $1 AND retired_at IS NULL
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.full_name)
        .bind(&record.phone_number)
        .bind(&record.profile_image)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_account_conflict)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("account {id}")));
        }
        Ok(record)
    }

    async fn retire_account(&self, id: &AccountId) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let result = sqlx::query(
            "UPDATE accounts SET retired_at = $2 WHERE id = $1 AND retired_at IS NULL",
        )
        .bind(id.as_uuid())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let retired = result.rows_affected() > 0;
        if retired {
            sqlx::query("DELETE FROM sessions WHERE account_id = $1")
                .bind(id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
        }
        tx.commit().await.map_err(map_sqlx)?;
        Ok(retired)
    }

    async fn issue_session(&self, id: &AccountId, ttl: TtlDuration) -> StoreResult<IssuedSession> {
        let token = SessionToken::generate();
        let now = Utc::now();
        let expires_at = now + ttl;

        let result = sqlx::query(
            r#"
            INSERT INTO sessions (token_digest, account_id, expires_at, created_at)
            SELECT $1, id, $3, $4 FROM accounts WHERE id = $2 AND retired_at IS NULL
            "#,
        )
        .bind(session_key(token.as_str()))
        .bind(id.as_uuid())
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("account {id}")));
        }
        Ok(IssuedSession { token, expires_at })
    }

    async fn find_session(
        &self,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Principal>> {
        let row = sqlx::query(
            r#"
            SELECT a.id, a.email, a.role, a.tenant_id
            FROM sessions s
            JOIN accounts a ON a.id = s.account_id
            WHERE s.token_digest = $1 AND s.expires_at > $2 AND a.retired_at IS NULL
            "#,
        )
        .bind(session_key(token.as_str()))
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let account_id = AccountId::from_uuid(row.try_get::<Uuid, _>("id").map_err(map_sqlx)?);
        let role: String = row.try_get("role").map_err(map_sqlx)?;
        let raw_tenant: Option<String> = row.try_get("tenant_id").map_err(map_sqlx)?;

        // Stored data may predate tenant assignment; such principals
        // authenticate but cannot be routed.
        let tenant_id = raw_tenant.and_then(|raw| match TenantId::new(raw) {
            Ok(tenant) => Some(tenant),
            Err(err) => {
                warn!(account = %account_id, error = %err, "stored tenant id is unusable");
                None
            }
        });

        Ok(Some(Principal {
            account_id,
            email: row.try_get("email").map_err(map_sqlx)?,
            role: role
                .parse::<AccountRole>()
                .map_err(|e| StoreError::Query(e.to_string()))?,
            tenant_id,
        }))
    }

    async fn revoke_session(&self, token: &SessionToken) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE token_digest = $1")
            .bind(session_key(token.as_str()))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TenantLedger for PgStore {
    async fn record_entry(&self, entry: LedgerEntry) -> StoreResult<LedgerEntry> {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                id, kind, title, amount_minor, category, description,
                occurred_at, created_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.kind.as_str())
        .bind(&entry.title)
        .bind(entry.amount_minor)
        .bind(&entry.category)
        .bind(&entry.description)
        .bind(entry.occurred_at)
        .bind(entry.created_by.as_uuid())
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(entry)
    }

    async fn list_entries(
        &self,
        kind: Option<EntryKind>,
        window: QueryWindow,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, title, amount_minor, category, description,
                   occurred_at, created_by, created_at
            FROM ledger_entries
            WHERE ($1::TEXT IS NULL OR kind = $1)
            ORDER BY occurred_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(kind.map(|k| k.as_str()))
        .bind(to_i64(window.limit)?)
        .bind(to_i64(window.offset)?)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn totals(&self) -> StoreResult<LedgerTotals> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(amount_minor) FILTER (WHERE kind = 'expense'), 0)::BIGINT AS expense_minor,
                COALESCE(SUM(amount_minor) FILTER (WHERE kind = 'income'), 0)::BIGINT AS income_minor,
                COUNT(*) AS entries
            FROM ledger_entries
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let entries: i64 = row.try_get("entries").map_err(map_sqlx)?;
        Ok(LedgerTotals {
            expense_minor: row.try_get("expense_minor").map_err(map_sqlx)?,
            income_minor: row.try_get("income_minor").map_err(map_sqlx)?,
            entries: u64::try_from(entries).unwrap_or_default(),
        })
    }
}

/// Classify a driver error. Transport and pool failures are connection
/// errors so the caller can evict the broken connection.
fn map_sqlx(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Connection(err.to_string()),
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            StoreError::Conflict(db_err.message().to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}

fn map_account_conflict(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.constraint() {
            Some("accounts_email_key") => {
                return StoreError::Conflict("email is already registered".to_string())
            }
            Some("accounts_phone_number_key") => {
                return StoreError::Conflict("phone number is already registered".to_string())
            }
            _ => {}
        }
    }
    map_sqlx(err)
}

fn to_i64(value: usize) -> StoreResult<i64> {
    i64::try_from(value)
        .map_err(|_| StoreError::InvalidInput("window value too large".to_string()))
}
