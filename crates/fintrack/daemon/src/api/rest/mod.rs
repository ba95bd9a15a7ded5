//! REST API over the master store and tenant registry

pub mod auth;
pub mod handlers;
pub mod router;
pub mod state;
