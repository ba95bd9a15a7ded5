//! Master-store account records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::ids::{AccountId, TenantId};
use crate::verification::Verification;

/// Avatar assigned to accounts that never uploaded one.
pub const DEFAULT_PROFILE_IMAGE: &str = "https://cdn-icons-png.flaticon.com/512/149/149071.png";

/// Minimum credential length accepted at signup.
pub const MIN_CREDENTIAL_LEN: usize = 6;

/// Account classification used by authorization.
///
/// `Admin` and `Administrator` are both accepted spellings in stored data and
/// are kept apart here; deciding whether they grant the same rights belongs
/// to the authorization layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    Administrator,
    Admin,
    #[default]
    Business,
    Organization,
}

impl AccountRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountRole::Administrator => "administrator",
            AccountRole::Admin => "admin",
            AccountRole::Business => "business",
            AccountRole::Organization => "organization",
        }
    }
}

impl fmt::Display for AccountRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountRole {
    type Err = InvalidAccount;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "administrator" => Ok(AccountRole::Administrator),
            "admin" => Ok(AccountRole::Admin),
            "business" => Ok(AccountRole::Business),
            "organization" => Ok(AccountRole::Organization),
            other => Err(InvalidAccount::new("role", format!("unknown role '{other}'"))),
        }
    }
}

/// Account as seen outside the master store. Credential material never
/// appears here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: AccountId,
    pub full_name: String,
    pub email: String,
    pub phone_number: String,
    pub role: AccountRole,
    pub tenant_id: TenantId,
    pub verification: Verification,
    pub profile_image: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Signup input
#[derive(Clone, Deserialize)]
pub struct NewAccount {
    pub full_name: String,
    pub email: String,
    pub phone_number: String,
    pub credential: String,
    #[serde(default)]
    pub role: AccountRole,
}

impl fmt::Debug for NewAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewAccount")
            .field("full_name", &self.full_name)
            .field("email", &self.email)
            .field("phone_number", &self.phone_number)
            .field("credential", &"<redacted>")
            .field("role", &self.role)
            .finish()
    }
}

impl NewAccount {
    /// Trim and lowercase fields the way they are stored, rejecting
    /// anything that cannot be stored.
    pub fn normalized(self) -> Result<Self, InvalidAccount> {
        let full_name = self.full_name.trim().to_string();
        if full_name.is_empty() {
            return Err(InvalidAccount::new("full_name", "is required"));
        }

        let email = normalize_email(&self.email);
        if !looks_like_email(&email) {
            return Err(InvalidAccount::new("email", "is not a valid address"));
        }

        let phone_number = self.phone_number.trim().to_string();
        if phone_number.is_empty() {
            return Err(InvalidAccount::new("phone_number", "is required"));
        }

        if self.credential.chars().count() < MIN_CREDENTIAL_LEN {
            return Err(InvalidAccount::new(
                "credential",
                format!("must be at least {MIN_CREDENTIAL_LEN} characters"),
            ));
        }

        Ok(Self {
            full_name,
            email,
            phone_number,
            credential: self.credential,
            role: self.role,
        })
    }
}

/// Mutable profile fields. Tenant id and credential are not updatable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub phone_number: Option<String>,
    pub profile_image: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none() && self.phone_number.is_none() && self.profile_image.is_none()
    }

    /// Apply to a record, bumping `updated_at`.
    pub fn apply(&self, record: &mut AccountRecord, now: DateTime<Utc>) {
        if let Some(name) = &self.full_name {
            record.full_name = name.trim().to_string();
        }
        if let Some(phone) = &self.phone_number {
            record.phone_number = phone.trim().to_string();
        }
        if let Some(image) = &self.profile_image {
            record.profile_image = image.clone();
        }
        record.updated_at = now;
    }
}

/// Account input that failed validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct InvalidAccount {
    pub field: &'static str,
    pub reason: String,
}

impl InvalidAccount {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Canonical form used for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .rsplit_once('.')
            .map(|(host, tld)| !host.is_empty() && tld.len() >= 2)
            .unwrap_or(false)
        && !email.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup() -> NewAccount {
        NewAccount {
            full_name: "  Ada Lovelace ".into(),
            email: " Ada@Example.COM ".into(),
            phone_number: " +44 20 7946 0000 ".into(),
            credential: "difference-engine".into(),
            role: AccountRole::Business,
        }
    }

    #[test]
    fn normalization_trims_and_lowercases() {
        let account = signup().normalized().unwrap();
        assert_eq!(account.full_name, "Ada Lovelace");
        assert_eq!(account.email, "ada@example.com");
        assert_eq!(account.phone_number, "+44 20 7946 0000");
    }

    #[test]
    fn normalization_rejects_short_credential_and_bad_email() {
        let mut short = signup();
        short.credential = "abc".into();
        assert_eq!(short.normalized().unwrap_err().field, "credential");

        let mut bad = signup();
        bad.email = "not-an-email".into();
        assert_eq!(bad.normalized().unwrap_err().field, "email");

        let mut no_tld = signup();
        no_tld.email = "ada@example".into();
        assert_eq!(no_tld.normalized().unwrap_err().field, "email");
    }

    #[test]
    fn debug_output_redacts_credential() {
        let rendered = format!("{:?}", signup());
        assert!(!rendered.contains("difference-engine"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn role_parsing_keeps_admin_spellings_apart() {
        assert_eq!(" Admin ".parse::<AccountRole>().unwrap(), AccountRole::Admin);
        assert_eq!(
            "ADMINISTRATOR".parse::<AccountRole>().unwrap(),
            AccountRole::Administrator
        );
        assert!("owner".parse::<AccountRole>().is_err());
        assert_eq!(AccountRole::default(), AccountRole::Business);
    }
}
