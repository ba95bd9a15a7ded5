//! FinTrack connection routing.
//!
//! Two components decide which database a piece of work runs against:
//!
//! - [`MasterStore`]: the one shared connection to the master store, which
//!   holds accounts, sessions and each account's tenant id. Opened lazily,
//!   single-flight, replaced when reported broken.
//! - [`TenantRegistry`]: a cache of per-tenant connections keyed by tenant
//!   id, single-flight per tenant, evicted on disconnect, never caching a
//!   failure.
//!
//! [`resolve_tenant_handle`] ties them to a request: given the principal an
//! authentication layer produced, it hands back the tenant store handle for
//! that principal's tenant.
//!
//! Both components are generic over a [`Connector`]; [`PgConnector`] talks
//! to Postgres and [`MemoryConnector`] keeps everything in process.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

use std::time::Duration;

pub mod backend;
pub mod connector;
pub mod context;
pub mod credential;
pub mod error;
mod flight;
pub mod master;
pub mod memory;
pub mod postgres;
pub mod registry;
pub mod traits;

pub use backend::{AnyConnection, AnyConnector};
pub use connector::{redact_address, Connector};
pub use context::{resolve_tenant_handle, tenant_context, TenantContext};
pub use error::{ResolutionError, StoreError, StoreResult};
pub use master::{MasterConfig, MasterConnection, MasterStore};
pub use memory::{MemoryConnector, MemoryDatabase, MemoryStore};
pub use postgres::{PgConnector, PgStore, SchemaRole};
pub use registry::{AddressTemplate, RegistryConfig, RegistryStats, TenantHandle, TenantRegistry};
pub use traits::{AccountStore, IssuedAccount, IssuedSession, QueryWindow, TenantLedger};

/// Bound on a single connection attempt unless configured otherwise.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Tries at drawing an unused tenant id before giving up.
pub(crate) const TENANT_ID_ATTEMPTS: usize = 5;
