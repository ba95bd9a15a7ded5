//! API request handlers

mod auth;
mod health;
mod ledger;

pub use auth::*;
pub use health::*;
pub use ledger::*;
