//! Account management handlers.
//!
//! Clinic admins manage the staff and doctors of their own clinic. The doctor
//! directory is public so patients can pick a doctor before logging in.

use crate::errors::ClinicError;
use crate::middleware::{require_role, AuthUser};
use crate::models::{
    AccountStatus, CreateStaffRequest, DoctorSummary, DoctorsQuery, UserListQuery, UserResponse,
};
use crate::repositories::{ClinicsRepository, UsersRepository};
use crate::routes::AppState;
use crate::services::accounts;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use common::types::Role;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Handler for GET /api/v1/users
#[instrument(skip_all, name = "clinic.handlers.list_users")]
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<UserListQuery>,
) -> Result<Json<Vec<UserResponse>>, ClinicError> {
    require_role(&user, &[Role::ClinicAdmin])?;
    let clinic_id = user.clinic()?;

    let rows =
        UsersRepository::list_for_clinic(&state.pool, clinic_id, query.status, query.role).await?;
    let users = rows
        .into_iter()
        .map(UserResponse::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(users))
}

/// Handler for POST /api/v1/users
///
/// Staff and doctors created by an admin skip the approval step.
#[instrument(skip_all, name = "clinic.handlers.create_user")]
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<CreateStaffRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ClinicError> {
    require_role(&user, &[Role::ClinicAdmin])?;
    let clinic_id = user.clinic()?;

    let account = request.validate()?;
    let created =
        accounts::create_staff(&state.pool, clinic_id, &account, state.config.bcrypt_cost).await?;
    Ok((StatusCode::CREATED, Json(UserResponse::try_from(created)?)))
}

/// Handler for POST /api/v1/users/:user_id/approve
#[instrument(skip_all, name = "clinic.handlers.approve_user", fields(user_id = %user_id))]
pub async fn approve_user(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserResponse>, ClinicError> {
    decide(&state, &user, user_id, AccountStatus::Approved).await
}

/// Handler for POST /api/v1/users/:user_id/reject
#[instrument(skip_all, name = "clinic.handlers.reject_user", fields(user_id = %user_id))]
pub async fn reject_user(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserResponse>, ClinicError> {
    decide(&state, &user, user_id, AccountStatus::Rejected).await
}

async fn decide(
    state: &AppState,
    user: &AuthUser,
    user_id: Uuid,
    decision: AccountStatus,
) -> Result<Json<UserResponse>, ClinicError> {
    require_role(user, &[Role::ClinicAdmin])?;
    let clinic = ClinicsRepository::find_by_id(&state.pool, user.clinic()?)
        .await?
        .ok_or_else(|| ClinicError::NotFound("Clinic not found".to_string()))?;

    let decided =
        accounts::decide_account(&state.pool, state.notifier.as_ref(), &clinic, user_id, decision)
            .await?;
    Ok(Json(UserResponse::try_from(decided)?))
}

/// Handler for GET /api/v1/doctors?clinic_id=
#[instrument(skip_all, name = "clinic.handlers.list_doctors", fields(clinic_id = %query.clinic_id))]
pub async fn list_doctors(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DoctorsQuery>,
) -> Result<Json<Vec<DoctorSummary>>, ClinicError> {
    ClinicsRepository::get_active(&state.pool, query.clinic_id).await?;
    Ok(Json(
        UsersRepository::list_doctors(&state.pool, query.clinic_id).await?,
    ))
}
