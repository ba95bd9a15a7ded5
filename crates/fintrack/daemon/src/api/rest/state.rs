//! Application state for API handlers

use crate::config::{AuthConfig, DaemonConfig, StorageConfig};
use crate::error::{DaemonError, DaemonResult};
use fintrack_store::{
    AnyConnector, MasterStore, MemoryConnector, PgConnector, TenantContext, TenantRegistry,
};

/// Master store handle used by the daemon
pub type Master = MasterStore<AnyConnector>;

/// Tenant registry used by the daemon
pub type Tenants = TenantRegistry<AnyConnector>;

/// Tenant context attached to ledger requests
pub type RequestTenant = TenantContext<AnyConnector>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Master store (accounts and sessions)
    pub master: Master,

    /// Per-tenant ledger stores
    pub tenants: Tenants,

    /// Session and verification settings
    pub auth: AuthConfig,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Create new application state
    pub fn new(master: Master, tenants: Tenants, auth: AuthConfig) -> Self {
        Self {
            master,
            tenants,
            auth,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    /// Build both stores from configuration. Nothing is connected yet; a
    /// missing tenant template fails here.
    pub fn from_config(config: &DaemonConfig) -> DaemonResult<Self> {
        let (master_connector, tenant_connector) = match &config.storage {
            StorageConfig::Memory => {
                let shared = MemoryConnector::new();
                (
                    AnyConnector::Memory(shared.clone()),
                    AnyConnector::Memory(shared),
                )
            }
            StorageConfig::Postgres {
                max_connections,
                ..
            } => {
                let timeout = config.storage.connect_timeout();
                (
                    AnyConnector::Postgres(PgConnector::master(*max_connections, timeout)),
                    AnyConnector::Postgres(PgConnector::tenant(*max_connections, timeout)),
                )
            }
        };

        let master = MasterStore::new(master_connector, config.storage.master());
        let tenants = TenantRegistry::new(tenant_connector, config.storage.tenants())
            .map_err(|e| DaemonError::Config(e.detail()))?;

        Ok(Self::new(master, tenants, config.auth.clone()))
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let duration = chrono::Utc::now() - self.started_at;
        let secs = duration.num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_without_template_is_a_config_error() {
        let config = DaemonConfig {
            storage: StorageConfig::Postgres {
                master_url: Some("postgres://db/fintrack_master".into()),
                tenant_url_template: None,
                max_connections: 10,
                connect_timeout_secs: 15,
            },
            ..DaemonConfig::default()
        };
        assert!(matches!(
            AppState::from_config(&config),
            Err(DaemonError::Config(_))
        ));
    }

    #[tokio::test]
    async fn memory_config_builds_unconnected_stores() {
        let state = AppState::from_config(&DaemonConfig::default()).unwrap();
        assert_eq!(state.master.connect_attempts(), 0);
        assert!(!state.master.is_connected().await);
        assert_eq!(state.tenants.stats().await.live, 0);
        assert_eq!(state.uptime(), "0s");
    }
}
