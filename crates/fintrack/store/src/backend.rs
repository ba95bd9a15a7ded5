//! Runtime choice between the Postgres and in-memory backends

use async_trait::async_trait;
use chrono::{DateTime, Duration as TtlDuration, Utc};
use fintrack_types::{
    AccountId, AccountRecord, EntryKind, LedgerEntry, LedgerTotals, NewAccount, Principal,
    ProfileUpdate, SessionToken,
};

use crate::connector::Connector;
use crate::error::StoreResult;
use crate::memory::{MemoryConnector, MemoryStore};
use crate::postgres::{PgConnector, PgStore};
use crate::traits::{AccountStore, IssuedAccount, IssuedSession, QueryWindow, TenantLedger};

/// Connector selected from configuration
#[derive(Debug, Clone)]
pub enum AnyConnector {
    Postgres(PgConnector),
    Memory(MemoryConnector),
}

/// Connection produced by an [`AnyConnector`]
#[derive(Debug, Clone)]
pub enum AnyConnection {
    Postgres(PgStore),
    Memory(MemoryStore),
}

macro_rules! dispatch {
    ($conn:expr, $store:ident => $call:expr) => {
        match $conn {
            AnyConnection::Postgres($store) => $call,
            AnyConnection::Memory($store) => $call,
        }
    };
}

#[async_trait]
impl Connector for AnyConnector {
    type Connection = AnyConnection;

    async fn connect(&self, address: &str) -> StoreResult<AnyConnection> {
        match self {
            AnyConnector::Postgres(pg) => pg.connect(address).await.map(AnyConnection::Postgres),
            AnyConnector::Memory(mem) => mem.connect(address).await.map(AnyConnection::Memory),
        }
    }

    fn is_healthy(&self, connection: &AnyConnection) -> bool {
        match (self, connection) {
            (AnyConnector::Postgres(pg), AnyConnection::Postgres(store)) => pg.is_healthy(store),
            (AnyConnector::Memory(mem), AnyConnection::Memory(store)) => mem.is_healthy(store),
            _ => false,
        }
    }

    async fn close(&self, connection: AnyConnection) {
        match (self, connection) {
            (AnyConnector::Postgres(pg), AnyConnection::Postgres(store)) => pg.close(store).await,
            (AnyConnector::Memory(mem), AnyConnection::Memory(store)) => mem.close(store).await,
            _ => {}
        }
    }
}

#[async_trait]
impl AccountStore for AnyConnection {
    async fn create_account(
        &self,
        account: NewAccount,
        code_ttl: TtlDuration,
    ) -> StoreResult<IssuedAccount> {
        dispatch!(self, s => s.create_account(account, code_ttl).await)
    }

    async fn find_account(&self, id: &AccountId) -> StoreResult<Option<AccountRecord>> {
        dispatch!(self, s => s.find_account(id).await)
    }

    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<AccountRecord>> {
        dispatch!(self, s => s.find_account_by_email(email).await)
    }

    async fn authenticate(
        &self,
        email: &str,
        credential: &str,
    ) -> StoreResult<Option<AccountRecord>> {
        dispatch!(self, s => s.authenticate(email, credential).await)
    }

    async fn verify_account(
        &self,
        email: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<AccountRecord> {
        dispatch!(self, s => s.verify_account(email, code, now).await)
    }

    async fn update_profile(
        &self,
        id: &AccountId,
        update: ProfileUpdate,
    ) -> StoreResult<AccountRecord> {
        dispatch!(self, s => s.update_profile(id, update).await)
    }

    async fn retire_account(&self, id: &AccountId) -> StoreResult<bool> {
        dispatch!(self, s => s.retire_account(id).await)
    }

    async fn issue_session(&self, id: &AccountId, ttl: TtlDuration) -> StoreResult<IssuedSession> {
        dispatch!(self, s => s.issue_session(id, ttl).await)
    }

    async fn find_session(
        &self,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Principal>> {
        dispatch!(self, s => s.find_session(token, now).await)
    }

    async fn revoke_session(&self, token: &SessionToken) -> StoreResult<bool> {
        dispatch!(self, s => s.revoke_session(token).await)
    }
}

#[async_trait]
impl TenantLedger for AnyConnection {
    async fn record_entry(&self, entry: LedgerEntry) -> StoreResult<LedgerEntry> {
        dispatch!(self, s => s.record_entry(entry).await)
    }

    async fn list_entries(
        &self,
        kind: Option<EntryKind>,
        window: QueryWindow,
    ) -> StoreResult<Vec<LedgerEntry>> {
        dispatch!(self, s => s.list_entries(kind, window).await)
    }

    async fn totals(&self) -> StoreResult<LedgerTotals> {
        dispatch!(self, s => s.totals().await)
    }
}
