//! Strongly-typed identifiers for FinTrack entities
//!
//! Account and entry ids are UUID-based. Tenant ids are short strings that
//! double as database names, so they carry a validated character set.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::account::AccountRole;

/// Unique identifier for an account in the master store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(Uuid);

impl AccountId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Unique identifier for a ledger entry inside a tenant store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(Uuid);

impl EntryId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Longest tenant id accepted; matches the Postgres identifier limit.
pub const MAX_TENANT_ID_LEN: usize = 63;

/// Routing key from an account to its isolated tenant store.
///
/// A tenant id is assigned once at account creation and never changes or
/// gets reassigned. It is restricted to `[a-z0-9_]`, starts with a letter and
/// is at most 63 bytes, so substituting it into an address template can
/// neither collide with another tenant nor escape the placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

/// Rejected tenant identifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTenantId {
    #[error("tenant id is empty")]
    Empty,

    #[error("tenant id exceeds {MAX_TENANT_ID_LEN} characters")]
    TooLong,

    #[error("tenant id must start with a lowercase letter")]
    BadStart,

    #[error("tenant id contains invalid character {0:?}")]
    BadChar(char),
}

impl TenantId {
    /// Validate and wrap an existing tenant id.
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidTenantId> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Generate a fresh id for a new account of the given role.
    ///
    /// Uniqueness against existing accounts is checked by the master store,
    /// which regenerates on collision.
    pub fn generate(role: AccountRole) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("expense_{}_{}", role.as_str(), &suffix[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> Result<(), InvalidTenantId> {
        let first = id.chars().next().ok_or(InvalidTenantId::Empty)?;
        if id.len() > MAX_TENANT_ID_LEN {
            return Err(InvalidTenantId::TooLong);
        }
        if !first.is_ascii_lowercase() {
            return Err(InvalidTenantId::BadStart);
        }
        if let Some(bad) = id
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_'))
        {
            return Err(InvalidTenantId::BadChar(bad));
        }
        Ok(())
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = InvalidTenantId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = InvalidTenantId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_account_id_generation() {
        let id1 = AccountId::generate();
        let id2 = AccountId::generate();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_account_id_parse_roundtrip() {
        let id = AccountId::generate();
        let parsed: AccountId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn generated_tenant_ids_are_valid_and_distinct() {
        for role in [
            AccountRole::Administrator,
            AccountRole::Admin,
            AccountRole::Business,
            AccountRole::Organization,
        ] {
            let a = TenantId::generate(role);
            let b = TenantId::generate(role);
            assert!(TenantId::new(a.as_str()).is_ok(), "{a} should validate");
            assert!(a.as_str().starts_with(&format!("expense_{}_", role.as_str())));
            assert_ne!(a, b);
        }
    }

    #[test]
    fn tenant_id_rejects_bad_input() {
        assert_eq!(TenantId::new(""), Err(InvalidTenantId::Empty));
        assert_eq!(TenantId::new("9lives"), Err(InvalidTenantId::BadStart));
        assert_eq!(TenantId::new("_x"), Err(InvalidTenantId::BadStart));
        assert_eq!(TenantId::new("acct-42"), Err(InvalidTenantId::BadChar('-')));
        assert_eq!(TenantId::new("Acct"), Err(InvalidTenantId::BadStart));
        assert_eq!(TenantId::new("a".repeat(64)), Err(InvalidTenantId::TooLong));
        assert!(TenantId::new("acct_42").is_ok());
    }

    #[test]
    fn tenant_id_deserialize_validates() {
        let ok: TenantId = serde_json::from_str("\"acct_7\"").unwrap();
        assert_eq!(ok.as_str(), "acct_7");
        assert!(serde_json::from_str::<TenantId>("\"acct/../x\"").is_err());
    }

    proptest! {
        #[test]
        fn accepted_ids_stay_in_charset(raw in "\\PC{0,80}") {
            if let Ok(id) = TenantId::new(raw.clone()) {
                prop_assert_eq!(id.as_str(), raw.as_str());
                prop_assert!(id.as_str().len() <= MAX_TENANT_ID_LEN);
                prop_assert!(id
                    .as_str()
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
            }
        }

        #[test]
        fn well_formed_ids_are_accepted(raw in "[a-z][a-z0-9_]{0,62}") {
            prop_assert!(TenantId::new(raw).is_ok());
        }
    }
}
