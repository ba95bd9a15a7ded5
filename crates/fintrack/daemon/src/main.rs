//! FinTrack daemon
//!
//! Serves account, session and ledger routes. Accounts and sessions live in
//! the master store; each account's ledger lives in its own tenant store.

use clap::Parser;
use fintrack_daemon::config::DaemonConfig;
use fintrack_daemon::error::{DaemonError, DaemonResult};
use fintrack_daemon::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// FinTrack daemon CLI
#[derive(Parser)]
#[command(name = "fintrackd")]
#[command(about = "FinTrack Daemon - multi-tenant ledger service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "FINTRACK_CONFIG")]
    config: Option<String>,

    /// Listen address (overrides the configuration file)
    #[arg(short, long, env = "FINTRACK_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level (overrides the configuration file)
    #[arg(long, env = "FINTRACK_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "FINTRACK_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    // Override with CLI args
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let backend = match &config.storage {
        fintrack_daemon::config::StorageConfig::Memory => "memory",
        fintrack_daemon::config::StorageConfig::Postgres { .. } => "postgres",
    };

    // Print startup banner
    println!(
        r#"
  FinTrack - multi-tenant ledger daemon
  Version: {}
  Storage: {}
  Listening: {}
"#,
        env!("CARGO_PKG_VERSION"),
        backend,
        config.server.listen_addr
    );

    // Create and run server
    let server = Server::new(config).await?;
    server.run().await
}
