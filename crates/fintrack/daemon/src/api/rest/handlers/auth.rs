//! Signup, verification and session handlers

use crate::api::rest::auth::Authenticated;
use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use fintrack_types::{AccountRecord, NewAccount, ProfileUpdate, SessionToken};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Signup response
#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub account: AccountRecord,
    /// Present only when the daemon is configured to expose codes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_code: Option<String>,
}

/// Create an account. Its tenant id is assigned by the master store.
pub async fn signup(
    State(state): State<AppState>,
    Json(request): Json<NewAccount>,
) -> ApiResult<(StatusCode, Json<SignupResponse>)> {
    let issued = state
        .master
        .create_account(request, state.auth.verification_code_ttl())
        .await?;

    info!(
        account = %issued.record.id,
        tenant = %issued.record.tenant_id,
        "account created, verification pending"
    );

    let verification_code = state
        .auth
        .expose_verification_codes
        .then_some(issued.verification_code);

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            account: issued.record,
            verification_code,
        }),
    ))
}

/// Verification request
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub email: String,
    pub code: String,
}

/// Consume a pending verification code
pub async fn verify(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> ApiResult<Json<AccountRecord>> {
    let account = state
        .master
        .verify_account(&request.email, request.code.trim(), Utc::now())
        .await?;
    info!(account = %account.id, "account verified");
    Ok(Json(account))
}

/// Login request
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub credential: String,
}

/// Login response
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: SessionToken,
    pub expires_at: DateTime<Utc>,
    pub account: AccountRecord,
}

/// Exchange email and credential for a bearer session
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let account = state
        .master
        .authenticate(&request.email, &request.credential)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("invalid email or credential".to_string()))?;

    if !account.verification.is_verified() {
        return Err(ApiError::Forbidden("account is not verified".to_string()));
    }

    let session = state
        .master
        .issue_session(&account.id, state.auth.session_ttl())
        .await?;
    info!(account = %account.id, "session issued");

    Ok(Json(LoginResponse {
        token: session.token,
        expires_at: session.expires_at,
        account,
    }))
}

/// Revoke the presented session
pub async fn logout(State(state): State<AppState>, auth: Authenticated) -> ApiResult<StatusCode> {
    state.master.revoke_session(&auth.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The caller's own account
pub async fn current_account(
    State(state): State<AppState>,
    auth: Authenticated,
) -> ApiResult<Json<AccountRecord>> {
    state
        .master
        .find_account(&auth.principal.account_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("account {}", auth.principal.account_id)))
}

/// Change the caller's name, phone number or profile image
pub async fn update_profile(
    State(state): State<AppState>,
    auth: Authenticated,
    Json(update): Json<ProfileUpdate>,
) -> ApiResult<Json<AccountRecord>> {
    let account = state
        .master
        .update_profile(&auth.principal.account_id, update)
        .await?;
    Ok(Json(account))
}

/// Retire the caller's account. Its sessions stop resolving and its tenant
/// id is never handed out again.
pub async fn retire_account(
    State(state): State<AppState>,
    auth: Authenticated,
) -> ApiResult<StatusCode> {
    let account = auth.principal.account_id;
    if !state.master.retire_account(&account).await? {
        return Err(ApiError::NotFound(format!("account {account}")));
    }
    info!(
        account = %account,
        tenant = ?auth.principal.tenant_id,
        "account retired"
    );
    Ok(StatusCode::NO_CONTENT)
}
