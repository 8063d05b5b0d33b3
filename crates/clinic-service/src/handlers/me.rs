//! Current user handler.

use crate::errors::ClinicError;
use crate::models::UserResponse;
use crate::repositories::UsersRepository;
use crate::routes::AppState;
use axum::{extract::State, Extension, Json};
use common::jwt::UserClaims;
use common::types::Role;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Response for `/api/v1/me`.
#[derive(Debug, Clone, Serialize)]
pub struct MeResponse {
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinic_id: Option<Uuid>,
    pub role: Role,
    /// Token expiration timestamp.
    pub exp: i64,
    /// Token issued-at timestamp.
    pub iat: i64,
    pub profile: UserResponse,
}

/// Handler for GET /api/v1/me
///
/// Token claims plus the stored profile. A token for a deleted account is
/// rejected as invalid.
#[instrument(skip_all, name = "clinic.handlers.me")]
pub async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<UserClaims>,
) -> Result<Json<MeResponse>, ClinicError> {
    let user_id = claims.user_id()?.0;
    let profile = UsersRepository::find_by_id(&state.pool, user_id)
        .await?
        .ok_or_else(|| ClinicError::InvalidToken("Account no longer exists".to_string()))?;

    Ok(Json(MeResponse {
        user_id,
        clinic_id: claims.clinic_id()?.map(|c| c.0),
        role: claims.role,
        exp: claims.exp,
        iat: claims.iat,
        profile: UserResponse::try_from(profile)?,
    }))
}
