//! Authentication handlers.
//!
//! - `POST /api/v1/auth/register` - staff/doctor self-registration (pending)
//! - `POST /api/v1/auth/otp/request` - send a patient login code
//! - `POST /api/v1/auth/otp/verify` - exchange a code for an access token
//! - `POST /api/v1/auth/login` - email and password login for staff and admins
//!
//! All four are public. Identifiers are normalized before lookup and only
//! their hashes reach the logs.

use crate::errors::ClinicError;
use crate::models::{
    normalize_email, LoginRequest, OtpRequest, OtpRequestResponse, OtpVerifyRequest,
    SelfRegisterRequest, TokenResponse, UserResponse,
};
use crate::routes::AppState;
use crate::services::otp::{self, OtpAttempt, OtpSettings};
use crate::services::accounts;
use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /api/v1/auth/register
#[instrument(skip_all, name = "clinic.handlers.register_account")]
pub async fn register_account(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SelfRegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ClinicError> {
    let (clinic_id, account) = request.validate()?;
    let user =
        accounts::self_register(&state.pool, clinic_id, &account, state.config.bcrypt_cost).await?;
    Ok((StatusCode::CREATED, Json(UserResponse::try_from(user)?)))
}

/// Handler for POST /api/v1/auth/otp/request
///
/// 202 once the code is handed to the gateway, 429 when the identifier has
/// asked too often, 503 when delivery fails.
#[instrument(skip_all, name = "clinic.handlers.request_otp", fields(channel = %request.channel))]
pub async fn request_otp(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OtpRequest>,
) -> Result<(StatusCode, Json<OtpRequestResponse>), ClinicError> {
    let identifier = request.validate()?;
    let response = otp::request_code(
        &state.pool,
        state.notifier.as_ref(),
        OtpSettings::from_config(&state.config),
        request.clinic_id,
        &identifier,
        request.channel,
        Utc::now(),
    )
    .await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Handler for POST /api/v1/auth/otp/verify
#[instrument(skip_all, name = "clinic.handlers.verify_otp", fields(channel = %request.channel))]
pub async fn verify_otp(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OtpVerifyRequest>,
) -> Result<Json<TokenResponse>, ClinicError> {
    let (identifier, full_name) = request.validate()?;
    let attempt = OtpAttempt {
        clinic_id: request.clinic_id,
        identifier: &identifier,
        channel: request.channel,
        code: &request.code,
        full_name: full_name.as_deref(),
    };

    let token = otp::verify_code(
        &state.pool,
        &state.signer,
        OtpSettings::from_config(&state.config),
        &attempt,
        Utc::now(),
    )
    .await?;
    Ok(Json(token))
}

/// Handler for POST /api/v1/auth/login
#[instrument(skip_all, name = "clinic.handlers.login")]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ClinicError> {
    // A malformed email cannot match any account
    let email = normalize_email(&request.email).map_err(|_| ClinicError::InvalidCredentials)?;
    let token = accounts::login(&state.pool, &state.signer, &email, &request.password).await?;
    Ok(Json(token))
}
