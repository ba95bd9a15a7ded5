//! Error types for fintrackd

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fintrack_store::{ResolutionError, StoreError};
use serde::Serialize;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// Store error surfaced during startup
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid bearer session
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Tenant resolution error
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ApiError::Store(err) => store_status(err),
            ApiError::Resolution(ResolutionError::MissingTenant { .. }) => {
                (StatusCode::BAD_REQUEST, "TENANT_UNRESOLVED")
            }
            ApiError::Resolution(ResolutionError::Unavailable(err)) => store_status(err),
        }
    }
}

fn store_status(err: &StoreError) -> (StatusCode, &'static str) {
    match err {
        StoreError::Configuration(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIGURATION_ERROR"),
        StoreError::Connection(_) => (StatusCode::SERVICE_UNAVAILABLE, "MASTER_UNAVAILABLE"),
        StoreError::TenantConnection { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "TENANT_UNAVAILABLE")
        }
        StoreError::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN"),
        StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        StoreError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
        StoreError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
        StoreError::Verification(_) => (StatusCode::BAD_REQUEST, "VERIFICATION_FAILED"),
        StoreError::Query(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(code, error = %self, "request failed");
        }

        let details = match &self {
            ApiError::Resolution(ResolutionError::MissingTenant { account }) => {
                Some(serde_json::json!({ "account_id": account }))
            }
            ApiError::Store(StoreError::TenantConnection { tenant, .. })
            | ApiError::Resolution(ResolutionError::Unavailable(StoreError::TenantConnection {
                tenant,
                ..
            })) => Some(serde_json::json!({ "tenant_id": tenant })),
            _ => None,
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;
    use fintrack_types::{AccountId, TenantId};

    fn status(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(status(ApiError::NotFound("test".to_string())), StatusCode::NOT_FOUND);
        assert_eq!(status(ApiError::BadRequest("test".to_string())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(ApiError::Unauthorized("test".to_string())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status(ApiError::Forbidden("test".to_string())), StatusCode::FORBIDDEN);
    }

    #[test]
    fn store_errors_map_to_distinct_statuses() {
        let tenant = TenantId::new("acct_7").unwrap();
        let cases = [
            (
                StoreError::Configuration("no template".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIGURATION_ERROR",
            ),
            (
                StoreError::Connection("refused".into()),
                StatusCode::SERVICE_UNAVAILABLE,
                "MASTER_UNAVAILABLE",
            ),
            (
                StoreError::TenantConnection {
                    tenant,
                    message: "refused".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
                "TENANT_UNAVAILABLE",
            ),
            (StoreError::Conflict("email".into()), StatusCode::CONFLICT, "CONFLICT"),
            (
                StoreError::InvalidInput("email".into()),
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
            ),
        ];

        for (err, expected_status, expected_code) in cases {
            let api = ApiError::from(err);
            assert_eq!(api.status_and_code(), (expected_status, expected_code));
        }
    }

    #[test]
    fn missing_tenant_is_a_client_error() {
        let err = ApiError::from(ResolutionError::MissingTenant {
            account: AccountId::generate(),
        });
        assert_eq!(
            err.status_and_code(),
            (StatusCode::BAD_REQUEST, "TENANT_UNRESOLVED")
        );
    }

    #[test]
    fn unreachable_tenant_is_unavailable() {
        let err = ApiError::from(ResolutionError::Unavailable(StoreError::TenantConnection {
            tenant: TenantId::new("acct_9").unwrap(),
            message: "timed out".into(),
        }));
        assert_eq!(status(err), StatusCode::SERVICE_UNAVAILABLE);
    }
}
