//! Account verification lifecycle
//!
//! An account starts unverified with a one-time code and an expiry. It
//! becomes verified at most once. The pending code is cleared both when it is
//! consumed and when it is found expired, so a code can never be accepted
//! twice or after its deadline.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Verification state carried on an account record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    verified: bool,
    #[serde(skip)]
    pending_code: Option<String>,
    code_expires_at: Option<DateTime<Utc>>,
}

/// Why a verification attempt was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("account is already verified")]
    AlreadyVerified,

    #[error("no verification code is pending")]
    NoPendingCode,

    #[error("verification code does not match")]
    InvalidCode,

    #[error("verification code expired")]
    Expired,
}

impl Verification {
    /// Fresh unverified state with a code valid for `ttl`.
    pub fn pending(code: impl Into<String>, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            verified: false,
            pending_code: Some(code.into()),
            code_expires_at: Some(now + ttl),
        }
    }

    /// Already-verified state.
    pub fn verified() -> Self {
        Self {
            verified: true,
            pending_code: None,
            code_expires_at: None,
        }
    }

    /// Rebuild from stored columns.
    pub fn from_parts(
        verified: bool,
        pending_code: Option<String>,
        code_expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        if verified {
            return Self::verified();
        }
        Self {
            verified,
            pending_code,
            code_expires_at,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub fn pending_code(&self) -> Option<&str> {
        self.pending_code.as_deref()
    }

    pub fn code_expires_at(&self) -> Option<DateTime<Utc>> {
        self.code_expires_at
    }

    /// Clear an expired code. Returns true when something was cleared.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        let due = matches!(self.code_expires_at, Some(deadline) if deadline <= now);
        if due {
            self.pending_code = None;
            self.code_expires_at = None;
        }
        due
    }

    /// Attempt to verify with `code`.
    ///
    /// On `Expired` the pending code has already been cleared from `self`;
    /// callers must persist the state on that path too.
    pub fn consume(&mut self, code: &str, now: DateTime<Utc>) -> Result<(), VerificationError> {
        if self.verified {
            return Err(VerificationError::AlreadyVerified);
        }
        if self.expire_if_due(now) {
            return Err(VerificationError::Expired);
        }
        let pending = self
            .pending_code
            .as_deref()
            .ok_or(VerificationError::NoPendingCode)?;
        if pending != code.trim() {
            return Err(VerificationError::InvalidCode);
        }

        self.verified = true;
        self.pending_code = None;
        self.code_expires_at = None;
        Ok(())
    }
}
