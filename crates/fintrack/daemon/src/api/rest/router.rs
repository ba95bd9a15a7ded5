//! API Router configuration

use super::auth::tenant_context;
use super::handlers;
use super::state::AppState;
use crate::config::ServerConfig;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, server: &ServerConfig) -> Router {
    // Ledger routes need a resolved tenant store
    let ledger_routes = Router::new()
        .route(
            "/entries",
            get(handlers::list_entries).post(handlers::record_entry),
        )
        .route("/summary", get(handlers::ledger_summary))
        .route_layer(middleware::from_fn_with_state(state.clone(), tenant_context));

    let api_routes = Router::new()
        .route("/status", get(handlers::daemon_status))
        // Accounts and sessions
        .route("/auth/signup", post(handlers::signup))
        .route("/auth/verify", post(handlers::verify))
        .route("/auth/login", post(handlers::login))
        .route("/auth/logout", post(handlers::logout))
        .route(
            "/auth/me",
            get(handlers::current_account).delete(handlers::retire_account),
        )
        .route("/auth/profile", patch(handlers::update_profile))
        // Ledger
        .nest("/ledger", ledger_routes);

    // Build router with middleware
    let router = Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", api_routes)
        .layer(DefaultBodyLimit::max(server.max_body_size))
        .layer(TraceLayer::new_for_http());

    let router = if server.enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
