//! FinTrack daemon library
//!
//! This module provides the core components for the FinTrack daemon:
//! - REST API handlers for accounts, sessions and the tenant ledger
//! - Configuration layering
//! - Server lifecycle management

pub mod api;
pub mod config;
pub mod error;
pub mod server;

pub use api::rest::state::AppState;
pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError};
pub use server::Server;
