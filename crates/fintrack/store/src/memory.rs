//! In-memory backend for development and testing
//!
//! Databases live in the connector, keyed by address, so reconnecting to an
//! address sees the same data. Every `connect` hands out a fresh connection
//! object that can be disconnected on its own.

use async_trait::async_trait;
use chrono::{DateTime, Duration as TtlDuration, Utc};
use fintrack_types::{
    AccountId, AccountRecord, EntryKind, LedgerEntry, LedgerTotals, NewAccount, Principal,
    ProfileUpdate, SessionToken, TenantId, Verification, VerificationError, DEFAULT_PROFILE_IMAGE,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use crate::connector::Connector;
use crate::credential::{session_key, verification_code, CredentialDigest};
use crate::error::{StoreError, StoreResult};
use crate::traits::{AccountStore, IssuedAccount, IssuedSession, QueryWindow, TenantLedger};
use crate::TENANT_ID_ATTEMPTS;

/// Connector over process-local databases
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    inner: Arc<ConnectorState>,
}

#[derive(Debug, Default)]
struct ConnectorState {
    databases: RwLock<HashMap<String, Arc<MemoryDatabase>>>,
    unreachable: RwLock<HashSet<String>>,
    attempts_by_address: RwLock<HashMap<String, u64>>,
    attempts: AtomicU64,
    latency_ms: AtomicU64,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every subsequent `connect` by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.inner.latency_ms.store(millis, Ordering::Relaxed);
    }

    /// Make `connect` to `address` fail (or succeed again).
    pub async fn set_reachable(&self, address: &str, reachable: bool) {
        let mut unreachable = self.inner.unreachable.write().await;
        if reachable {
            unreachable.remove(address);
        } else {
            unreachable.insert(address.to_string());
        }
    }

    /// Total `connect` calls across all addresses.
    pub fn connect_attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::Relaxed)
    }

    pub async fn connect_attempts_for(&self, address: &str) -> u64 {
        let attempts = self.inner.attempts_by_address.read().await;
        attempts.get(address).copied().unwrap_or(0)
    }

    /// The database behind `address`, if anything ever connected to it.
    pub async fn database(&self, address: &str) -> Option<Arc<MemoryDatabase>> {
        let databases = self.inner.databases.read().await;
        databases.get(address).cloned()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Connection = MemoryStore;

    async fn connect(&self, address: &str) -> StoreResult<MemoryStore> {
        self.inner.attempts.fetch_add(1, Ordering::Relaxed);
        {
            let mut attempts = self.inner.attempts_by_address.write().await;
            *attempts.entry(address.to_string()).or_default() += 1;
        }

        let latency = self.inner.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.inner.unreachable.read().await.contains(address) {
            return Err(StoreError::Connection("connection refused".to_string()));
        }

        let database = {
            let mut databases = self.inner.databases.write().await;
            Arc::clone(databases.entry(address.to_string()).or_default())
        };
        Ok(MemoryStore::new(database))
    }

    fn is_healthy(&self, connection: &MemoryStore) -> bool {
        connection.is_open()
    }

    async fn close(&self, connection: MemoryStore) {
        connection.disconnect();
    }
}

#[derive(Debug)]
struct StoredAccount {
    record: AccountRecord,
    credential: CredentialDigest,
    retired_at: Option<DateTime<Utc>>,
}

impl StoredAccount {
    fn is_active(&self) -> bool {
        self.retired_at.is_none()
    }
}

#[derive(Debug)]
struct StoredSession {
    account_id: AccountId,
    expires_at: DateTime<Utc>,
}

/// One in-memory database. Serves as a master store, a tenant store, or
/// both.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    accounts: RwLock<HashMap<AccountId, StoredAccount>>,
    sessions: RwLock<HashMap<String, StoredSession>>,
    entries: RwLock<Vec<LedgerEntry>>,
}

impl MemoryDatabase {
    pub async fn account_count(&self) -> usize {
        self.accounts.read().await.len()
    }

    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// A connection to a [`MemoryDatabase`]
#[derive(Debug, Clone)]
pub struct MemoryStore {
    database: Arc<MemoryDatabase>,
    open: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new(database: Arc<MemoryDatabase>) -> Self {
        Self {
            database,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.database
    }

    /// Break this connection. Other connections to the same database are
    /// unaffected.
    pub fn disconnect(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Whether both values are clones of one connection.
    pub fn same_connection(&self, other: &MemoryStore) -> bool {
        Arc::ptr_eq(&self.open, &other.open)
    }

    fn ensure_open(&self) -> StoreResult<&MemoryDatabase> {
        if self.is_open() {
            Ok(&self.database)
        } else {
            Err(StoreError::Connection("connection closed".to_string()))
        }
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create_account(
        &self,
        account: NewAccount,
        code_ttl: TtlDuration,
    ) -> StoreResult<IssuedAccount> {
        let db = self.ensure_open()?;
        let account = account.normalized()?;
        let now = Utc::now();

        let mut accounts = db.accounts.write().await;
        if accounts
            .values()
            .any(|a| a.is_active() && a.record.email == account.email)
        {
            return Err(StoreError::Conflict("email is already registered".to_string()));
        }
        if accounts
            .values()
            .any(|a| a.is_active() && a.record.phone_number == account.phone_number)
        {
            return Err(StoreError::Conflict(
                "phone number is already registered".to_string(),
            ));
        }

        let tenant_id = (0..TENANT_ID_ATTEMPTS)
            .map(|_| TenantId::generate(account.role))
            .find(|candidate| !accounts.values().any(|a| &a.record.tenant_id == candidate))
            .ok_or_else(|| StoreError::Conflict("could not allocate a tenant id".to_string()))?;

        let code = verification_code();
        let record = AccountRecord {
            id: AccountId::generate(),
            full_name: account.full_name,
            email: account.email,
            phone_number: account.phone_number,
            role: account.role,
            tenant_id,
            verification: Verification::pending(code.clone(), code_ttl, now),
            profile_image: DEFAULT_PROFILE_IMAGE.to_string(),
            created_at: now,
            updated_at: now,
        };
        accounts.insert(
            record.id,
            StoredAccount {
                record: record.clone(),
                credential: CredentialDigest::derive(&account.credential),
                retired_at: None,
            },
        );
        debug!(account = %record.id, tenant = %record.tenant_id, "account created");

        Ok(IssuedAccount {
            record,
            verification_code: code,
        })
    }

    async fn find_account(&self, id: &AccountId) -> StoreResult<Option<AccountRecord>> {
        let accounts = self.ensure_open()?.accounts.read().await;
        Ok(accounts
            .get(id)
            .filter(|a| a.is_active())
            .map(|a| a.record.clone()))
    }

    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<AccountRecord>> {
        let email = fintrack_types::normalize_email(email);
        let accounts = self.ensure_open()?.accounts.read().await;
        Ok(accounts
            .values()
            .find(|a| a.is_active() && a.record.email == email)
            .map(|a| a.record.clone()))
    }

    async fn authenticate(
        &self,
        email: &str,
        credential: &str,
    ) -> StoreResult<Option<AccountRecord>> {
        let email = fintrack_types::normalize_email(email);
        let accounts = self.ensure_open()?.accounts.read().await;
        Ok(accounts
            .values()
            .find(|a| a.is_active() && a.record.email == email)
            .filter(|a| a.credential.matches(credential))
            .map(|a| a.record.clone()))
    }

    async fn verify_account(
        &self,
        email: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<AccountRecord> {
        let email = fintrack_types::normalize_email(email);
        let mut accounts = self.ensure_open()?.accounts.write().await;
        let stored = accounts
            .values_mut()
            .find(|a| a.is_active() && a.record.email == email)
            .ok_or_else(|| StoreError::NotFound(format!("account {email}")))?;

        let outcome = stored.record.verification.consume(code, now);
        if matches!(outcome, Ok(()) | Err(VerificationError::Expired)) {
            stored.record.updated_at = now;
        }
        outcome?;
        Ok(stored.record.clone())
    }

    async fn update_profile(
        &self,
        id: &AccountId,
        update: ProfileUpdate,
    ) -> StoreResult<AccountRecord> {
        if update.is_empty() {
            return Err(StoreError::InvalidInput("nothing to update".to_string()));
        }
        let mut accounts = self.ensure_open()?.accounts.write().await;
        if let Some(phone) = update.phone_number.as_deref().map(str::trim) {
            if accounts
                .values()
                .any(|a| a.is_active() && &a.record.id != id && a.record.phone_number == phone)
            {
                return Err(StoreError::Conflict(
                    "phone number is already registered".to_string(),
                ));
            }
        }

        let stored = accounts
            .get_mut(id)
            .filter(|a| a.is_active())
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))?;
        update.apply(&mut stored.record, Utc::now());
        Ok(stored.record.clone())
    }

    async fn retire_account(&self, id: &AccountId) -> StoreResult<bool> {
        let db = self.ensure_open()?;
        let retired = {
            let mut accounts = db.accounts.write().await;
            match accounts.get_mut(id).filter(|a| a.is_active()) {
                Some(stored) => {
                    stored.retired_at = Some(Utc::now());
                    true
                }
                None => false,
            }
        };
        if retired {
            db.sessions
                .write()
                .await
                .retain(|_, session| &session.account_id != id);
            debug!(account = %id, "account retired");
        }
        Ok(retired)
    }

    async fn issue_session(&self, id: &AccountId, ttl: TtlDuration) -> StoreResult<IssuedSession> {
        let db = self.ensure_open()?;
        let active = db
            .accounts
            .read()
            .await
            .get(id)
            .is_some_and(|a| a.is_active());
        if !active {
            return Err(StoreError::NotFound(format!("account {id}")));
        }

        let token = SessionToken::generate();
        let expires_at = Utc::now() + ttl;
        db.sessions.write().await.insert(
            session_key(token.as_str()),
            StoredSession {
                account_id: *id,
                expires_at,
            },
        );
        Ok(IssuedSession { token, expires_at })
    }

    async fn find_session(
        &self,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Principal>> {
        let db = self.ensure_open()?;
        let account_id = {
            let sessions = db.sessions.read().await;
            match sessions.get(&session_key(token.as_str())) {
                Some(session) if session.expires_at > now => session.account_id,
                _ => return Ok(None),
            }
        };
        let accounts = db.accounts.read().await;
        Ok(accounts
            .get(&account_id)
            .filter(|a| a.is_active())
            .map(|a| Principal::from(&a.record)))
    }

    async fn revoke_session(&self, token: &SessionToken) -> StoreResult<bool> {
        let db = self.ensure_open()?;
        let removed = db
            .sessions
            .write()
            .await
            .remove(&session_key(token.as_str()));
        Ok(removed.is_some())
    }
}

#[async_trait]
impl TenantLedger for MemoryStore {
    async fn record_entry(&self, entry: LedgerEntry) -> StoreResult<LedgerEntry> {
        let mut entries = self.ensure_open()?.entries.write().await;
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn list_entries(
        &self,
        kind: Option<EntryKind>,
        window: QueryWindow,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let entries = self.ensure_open()?.entries.read().await;
        let mut matching: Vec<LedgerEntry> = entries
            .iter()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        Ok(matching
            .into_iter()
            .skip(window.offset)
            .take(window.limit)
            .collect())
    }

    async fn totals(&self) -> StoreResult<LedgerTotals> {
        let entries = self.ensure_open()?.entries.read().await;
        Ok(entries.iter().fold(LedgerTotals::default(), |mut totals, entry| {
            totals.add(entry);
            totals
        }))
    }
}
