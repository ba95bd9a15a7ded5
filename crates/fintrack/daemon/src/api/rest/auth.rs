//! Bearer-session authentication and per-request tenant resolution

use super::state::{AppState, RequestTenant};
use crate::error::ApiError;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use fintrack_types::{Principal, SessionToken};

/// The caller behind a valid bearer session
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub principal: Principal,
    pub token: SessionToken,
}

#[async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

        let principal = state
            .master
            .find_session(&token, chrono::Utc::now())
            .await?
            .ok_or_else(|| ApiError::Unauthorized("session is invalid or expired".to_string()))?;

        Ok(Self { principal, token })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<SessionToken> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| SessionToken::new(token))
}

/// Resolve the caller's tenant store and attach it to the request as a
/// [`RequestTenant`] extension.
pub async fn tenant_context(
    State(state): State<AppState>,
    auth: Authenticated,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let context: RequestTenant =
        fintrack_store::tenant_context(&state.tenants, auth.principal).await?;
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn parses_bearer_scheme_case_insensitively() {
        let token = bearer_token(&headers("bearer abc123")).unwrap();
        assert_eq!(token.as_str(), "abc123");
        assert!(bearer_token(&headers("Bearer  xyz ")).is_some());
    }

    #[test]
    fn rejects_other_schemes_and_empty_tokens() {
        assert!(bearer_token(&headers("Basic abc123")).is_none());
        assert!(bearer_token(&headers("Bearer ")).is_none());
        assert!(bearer_token(&headers("abc123")).is_none());
        assert!(bearer_token(&HeaderMap::new()).is_none());
    }
}
