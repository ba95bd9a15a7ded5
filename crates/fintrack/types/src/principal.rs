//! Authenticated identities

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::account::{AccountRecord, AccountRole};
use crate::ids::{AccountId, TenantId};

/// Identity established for one inbound operation.
///
/// `tenant_id` is optional because stored account data can be incomplete;
/// a principal without one can still be authenticated but cannot be routed
/// to any tenant store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub account_id: AccountId,
    pub email: String,
    pub role: AccountRole,
    pub tenant_id: Option<TenantId>,
}

impl From<&AccountRecord> for Principal {
    fn from(record: &AccountRecord) -> Self {
        Self {
            account_id: record.id,
            email: record.email.clone(),
            role: record.role,
            tenant_id: Some(record.tenant_id.clone()),
        }
    }
}

/// Opaque bearer token naming a session held in the master store
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn generate() -> Self {
        Self(format!(
            "{}{}",
            Uuid::new_v4().simple(),
            Uuid::new_v4().simple()
        ))
    }

    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: String = self.0.chars().take(6).collect();
        write!(f, "SessionToken({visible}…)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_tokens_are_unique_and_debug_is_truncated() {
        let a = SessionToken::generate();
        let b = SessionToken::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(!format!("{a:?}").contains(a.as_str()));
    }
}
