//! FinTrack shared domain records.
//!
//! Everything here is plain data: identifiers, the master-store account
//! record and its verification lifecycle, the authenticated principal, and
//! the tenant-side ledger entries. Connection handling lives in
//! `fintrack-store`.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod account;
pub mod ids;
pub mod ledger;
pub mod principal;
pub mod verification;

pub use account::{
    normalize_email, AccountRecord, AccountRole, InvalidAccount, NewAccount, ProfileUpdate,
    DEFAULT_PROFILE_IMAGE, MIN_CREDENTIAL_LEN,
};
pub use ids::{AccountId, EntryId, InvalidTenantId, TenantId, MAX_TENANT_ID_LEN};
pub use ledger::{EntryKind, LedgerEntry, LedgerTotals, NewLedgerEntry};
pub use principal::{Principal, SessionToken};
pub use verification::{Verification, VerificationError};
