//! Configuration for fintrackd

use fintrack_store::{MasterConfig, RegistryConfig, DEFAULT_CONNECT_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Master store address used by the in-memory backend.
pub const MEMORY_MASTER_ADDRESS: &str = "memory://fintrack_master";

/// Tenant address template used by the in-memory backend.
pub const MEMORY_TENANT_TEMPLATE: &str = "memory://{tenant}";

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,

    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Maximum request body size in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 5011)),
            enable_cors: true,
            max_body_size: default_max_body_size(),
        }
    }
}

/// Where the master and tenant stores live
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Process-local stores (development/testing)
    #[default]
    Memory,

    /// One Postgres database for the master store plus one per tenant
    Postgres {
        /// Master store URL
        #[serde(default)]
        master_url: Option<String>,

        /// Tenant URL with a single `{tenant}` placeholder
        #[serde(default)]
        tenant_url_template: Option<String>,

        /// Maximum connections in each pool
        #[serde(default = "default_pool_size")]
        max_connections: u32,

        /// Bound on each connection attempt, in seconds
        #[serde(default = "default_connect_timeout")]
        connect_timeout_secs: u64,
    },
}

impl StorageConfig {
    pub fn connect_timeout(&self) -> Duration {
        match self {
            StorageConfig::Memory => DEFAULT_CONNECT_TIMEOUT,
            StorageConfig::Postgres {
                connect_timeout_secs,
                ..
            } => Duration::from_secs(*connect_timeout_secs),
        }
    }

    pub fn master(&self) -> MasterConfig {
        let address = match self {
            StorageConfig::Memory => Some(MEMORY_MASTER_ADDRESS.to_string()),
            StorageConfig::Postgres { master_url, .. } => master_url.clone(),
        };
        MasterConfig {
            address,
            connect_timeout: self.connect_timeout(),
        }
    }

    pub fn tenants(&self) -> RegistryConfig {
        let address_template = match self {
            StorageConfig::Memory => Some(MEMORY_TENANT_TEMPLATE.to_string()),
            StorageConfig::Postgres {
                tenant_url_template,
                ..
            } => tenant_url_template.clone(),
        };
        RegistryConfig {
            address_template,
            connect_timeout: self.connect_timeout(),
        }
    }
}

/// Session and verification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    #[serde(default = "default_code_ttl")]
    pub verification_code_ttl_secs: u64,

    /// Echo verification codes in the signup response. Development only;
    /// there is no mail delivery.
    #[serde(default)]
    pub expose_verification_codes: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl(),
            verification_code_ttl_secs: default_code_ttl(),
            expose_verification_codes: false,
        }
    }
}

impl AuthConfig {
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(clamp_secs(self.session_ttl_secs))
    }

    pub fn verification_code_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(clamp_secs(self.verification_code_ttl_secs))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn clamp_secs(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX / 1_000)
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}

fn default_session_ttl() -> u64 {
    30 * 24 * 60 * 60
}

fn default_code_ttl() -> u64 {
    10 * 60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Defaults, then the optional file, then `FINTRACK_*` environment
    /// variables (`__` between nested keys, e.g.
    /// `FINTRACK_STORAGE__MASTER_URL`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("FINTRACK")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.server.listen_addr.port(), 5011);
        assert!(config.server.enable_cors);
        assert!(matches!(config.storage, StorageConfig::Memory));
        assert_eq!(config.auth.session_ttl_secs, 2_592_000);
        assert_eq!(config.auth.verification_code_ttl_secs, 600);
        assert!(!config.auth.expose_verification_codes);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn memory_storage_resolves_fixed_addresses() {
        let storage = StorageConfig::Memory;
        assert_eq!(
            storage.master().address.as_deref(),
            Some(MEMORY_MASTER_ADDRESS)
        );
        assert_eq!(
            storage.tenants().address_template.as_deref(),
            Some(MEMORY_TENANT_TEMPLATE)
        );
        assert_eq!(storage.connect_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn file_layer_selects_postgres() {
        let dir = std::env::temp_dir().join(format!("fintrackd-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("fintrackd.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[server]
listen_addr = "0.0.0.0:9000"

[storage]
type = "postgres"
master_url = "postgres://app@db/fintrack_master"
tenant_url_template = "postgres://app@db/{{tenant}}"
connect_timeout_secs = 3

[auth]
expose_verification_codes = true
"#
        )
        .unwrap();

        let config = DaemonConfig::load(path.to_str()).unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert!(config.auth.expose_verification_codes);
        assert_eq!(config.auth.session_ttl_secs, 2_592_000);
        match &config.storage {
            StorageConfig::Postgres {
                master_url,
                max_connections,
                ..
            } => {
                assert_eq!(master_url.as_deref(), Some("postgres://app@db/fintrack_master"));
                assert_eq!(*max_connections, 10);
            }
            other => panic!("expected postgres storage, got {other:?}"),
        }
        assert_eq!(
            config.storage.tenants().address_template.as_deref(),
            Some("postgres://app@db/{tenant}")
        );
        assert_eq!(config.storage.connect_timeout(), Duration::from_secs(3));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn postgres_without_urls_leaves_addresses_unset() {
        let storage = StorageConfig::Postgres {
            master_url: None,
            tenant_url_template: None,
            max_connections: 10,
            connect_timeout_secs: 15,
        };
        assert!(storage.master().address.is_none());
        assert!(storage.tenants().address_template.is_none());
    }
}
