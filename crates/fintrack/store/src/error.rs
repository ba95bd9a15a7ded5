//! Store error types

use fintrack_types::{AccountId, InvalidAccount, TenantId, VerificationError};
use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the master store, the tenant registry and the data
/// operations routed through them.
///
/// `Clone` so a single connection attempt can hand the same failure to
/// every caller that joined it.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Missing or malformed configuration. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Master store unreachable, refused the connection or timed out.
    #[error("master store unavailable: {0}")]
    Connection(String),

    #[error("tenant store '{tenant}' unavailable: {message}")]
    TenantConnection { tenant: TenantId, message: String },

    #[error("store is shutting down")]
    ShuttingDown,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("verification failed: {0}")]
    Verification(#[from] VerificationError),
}

impl StoreError {
    /// Whether the error means the underlying connection is unusable.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            StoreError::Connection(_) | StoreError::TenantConnection { .. }
        )
    }

    /// The underlying message without the variant prefix.
    pub fn detail(&self) -> String {
        match self {
            StoreError::Configuration(message)
            | StoreError::Connection(message)
            | StoreError::NotFound(message)
            | StoreError::Conflict(message)
            | StoreError::InvalidInput(message)
            | StoreError::Query(message)
            | StoreError::TenantConnection { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<InvalidAccount> for StoreError {
    fn from(err: InvalidAccount) -> Self {
        StoreError::InvalidInput(err.to_string())
    }
}

/// Failure to turn a principal into a tenant store handle.
#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    /// The principal carries no tenant identifier. A client-side problem;
    /// never defaulted to another tenant.
    #[error("account {account} has no tenant store assigned")]
    MissingTenant { account: AccountId },

    #[error("tenant store could not be resolved: {0}")]
    Unavailable(#[source] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_class_errors() {
        let tenant = TenantId::new("acct_1").unwrap();
        assert!(StoreError::Connection("refused".into()).is_connection());
        assert!(StoreError::TenantConnection {
            tenant,
            message: "refused".into()
        }
        .is_connection());
        assert!(!StoreError::Query("syntax".into()).is_connection());
        assert!(!StoreError::ShuttingDown.is_connection());
    }

    #[test]
    fn detail_strips_prefix() {
        let err = StoreError::Connection("connection refused".into());
        assert_eq!(err.detail(), "connection refused");
        assert_eq!(err.to_string(), "master store unavailable: connection refused");
        assert_eq!(StoreError::ShuttingDown.detail(), "store is shutting down");
    }
}
