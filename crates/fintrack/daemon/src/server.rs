//! Server setup and lifecycle management

use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use fintrack_store::StoreError;
use tokio::net::TcpListener;

/// FinTrack daemon server
pub struct Server {
    config: DaemonConfig,
    state: AppState,
}

impl Server {
    /// Build the stores and try the master connection once.
    ///
    /// A configuration problem aborts startup. An unreachable master store
    /// does not; the next request that needs it retries.
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let state = AppState::from_config(&config)?;

        match state.master.acquire().await {
            Ok(master) => {
                tracing::info!(generation = master.generation(), "master store reachable");
            }
            Err(StoreError::Configuration(message)) => return Err(DaemonError::Config(message)),
            Err(err) => {
                tracing::warn!(error = %err, "master store unavailable at startup, will retry on demand");
            }
        }

        Ok(Self { config, state })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the server until a shutdown signal, then close every store
    /// connection.
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;
        let app = create_router(self.state.clone(), &self.config.server);

        let listener = TcpListener::bind(addr).await?;
        tracing::info!("FinTrack daemon listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("FinTrack daemon shutting down");

        self.state.tenants.shutdown().await;
        self.state.master.shutdown().await;

        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;

    #[tokio::test]
    async fn missing_master_url_aborts_startup() {
        let config = DaemonConfig {
            storage: StorageConfig::Postgres {
                master_url: None,
                tenant_url_template: Some("postgres://db/{tenant}".into()),
                max_connections: 1,
                connect_timeout_secs: 1,
            },
            ..DaemonConfig::default()
        };
        assert!(matches!(
            Server::new(config).await,
            Err(DaemonError::Config(_))
        ));
    }

    #[tokio::test]
    async fn memory_backend_connects_master_at_startup() {
        let server = Server::new(DaemonConfig::default()).await.unwrap();
        assert!(server.state().master.is_connected().await);
        assert_eq!(server.state().master.connect_attempts(), 1);
    }
}
