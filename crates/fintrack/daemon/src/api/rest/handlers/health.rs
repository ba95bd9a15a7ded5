//! Health and status handlers

use crate::api::rest::state::AppState;
use axum::{extract::State, Json};
use fintrack_store::RegistryStats;
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
}

/// Health check endpoint. Touches neither store.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
    })
}

/// Daemon status response
#[derive(Debug, Serialize)]
pub struct DaemonStatusResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub master: MasterStatus,
    pub tenants: RegistryStats,
}

/// Master connection summary
#[derive(Debug, Serialize)]
pub struct MasterStatus {
    pub connected: bool,
    pub connect_attempts: u64,
}

/// Daemon status endpoint. Reports cached state without connecting.
pub async fn daemon_status(State(state): State<AppState>) -> Json<DaemonStatusResponse> {
    let connected = state.master.is_connected().await;
    let status = if connected { "healthy" } else { "degraded" };

    Json(DaemonStatusResponse {
        status: status.to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
        started_at: state.started_at,
        master: MasterStatus {
            connected,
            connect_attempts: state.master.connect_attempts(),
        },
        tenants: state.tenants.stats().await,
    })
}
