//! Data operations carried out over an acquired connection

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fintrack_types::{
    AccountId, AccountRecord, EntryKind, LedgerEntry, LedgerTotals, NewAccount, Principal,
    ProfileUpdate, SessionToken,
};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// Paging window for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

impl Default for QueryWindow {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

/// A freshly created account and the verification code issued for it
#[derive(Debug, Clone)]
pub struct IssuedAccount {
    pub record: AccountRecord,
    pub verification_code: String,
}

/// A freshly issued bearer session
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: SessionToken,
    pub expires_at: DateTime<Utc>,
}

/// Account and session operations against the master store
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Validate and insert a new account with a fresh tenant id and a
    /// verification code valid for `code_ttl`.
    async fn create_account(
        &self,
        account: NewAccount,
        code_ttl: Duration,
    ) -> StoreResult<IssuedAccount>;

    async fn find_account(&self, id: &AccountId) -> StoreResult<Option<AccountRecord>>;

    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<AccountRecord>>;

    /// `Some` only when the credential matches an active account.
    async fn authenticate(
        &self,
        email: &str,
        credential: &str,
    ) -> StoreResult<Option<AccountRecord>>;

    /// Consume a verification code. An expired code is cleared before the
    /// error is returned.
    async fn verify_account(
        &self,
        email: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<AccountRecord>;

    async fn update_profile(
        &self,
        id: &AccountId,
        update: ProfileUpdate,
    ) -> StoreResult<AccountRecord>;

    /// Soft delete. The tenant id stays reserved.
    async fn retire_account(&self, id: &AccountId) -> StoreResult<bool>;

    async fn issue_session(&self, id: &AccountId, ttl: Duration) -> StoreResult<IssuedSession>;

    async fn find_session(
        &self,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Principal>>;

    async fn revoke_session(&self, token: &SessionToken) -> StoreResult<bool>;
}

/// Business data operations against one tenant store
#[async_trait]
pub trait TenantLedger: Send + Sync {
    async fn record_entry(&self, entry: LedgerEntry) -> StoreResult<LedgerEntry>;

    /// Newest first.
    async fn list_entries(
        &self,
        kind: Option<EntryKind>,
        window: QueryWindow,
    ) -> StoreResult<Vec<LedgerEntry>>;

    async fn totals(&self) -> StoreResult<LedgerTotals>;
}
