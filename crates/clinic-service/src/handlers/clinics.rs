//! Clinic (tenant) handlers.
//!
//! - `POST /api/v1/clinics/register` - register a clinic and its first admin (public)
//! - `GET /api/v1/clinics` - active clinics (public)
//! - `GET /api/v1/clinics/:clinic_id` - active clinic detail (public)
//! - `PATCH /api/v1/clinics/:clinic_id` - update details (clinic admin)
//! - `POST /api/v1/clinics/:clinic_id/approve` - activate (super admin)
//! - `POST /api/v1/clinics/:clinic_id/suspend` - suspend (super admin)

use crate::errors::ClinicError;
use crate::middleware::{ensure_same_clinic, require_role, AuthUser};
use crate::models::{
    ClinicRegistrationResponse, ClinicRow, ClinicStatus, RegisterClinicRequest,
    UpdateClinicRequest,
};
use crate::repositories::ClinicsRepository;
use crate::routes::AppState;
use crate::services::accounts;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use common::types::Role;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Handler for POST /api/v1/clinics/register
///
/// Both the clinic and its admin start `pending`.
///
/// # Response
///
/// - 201 Created: clinic and admin id
/// - 400 Bad Request: invalid fields
/// - 409 Conflict: admin email already registered
#[instrument(skip_all, name = "clinic.handlers.register_clinic")]
pub async fn register_clinic(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterClinicRequest>,
) -> Result<(StatusCode, Json<ClinicRegistrationResponse>), ClinicError> {
    let (clinic, admin) = request.validate(state.config.default_consultation_minutes)?;
    let response =
        accounts::register_clinic(&state.pool, &clinic, &admin, state.config.bcrypt_cost).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Handler for GET /api/v1/clinics
#[instrument(skip_all, name = "clinic.handlers.list_clinics")]
pub async fn list_clinics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ClinicRow>>, ClinicError> {
    Ok(Json(ClinicsRepository::list_active(&state.pool).await?))
}

/// Handler for GET /api/v1/clinics/:clinic_id
///
/// Pending and suspended clinics are reported as not found.
#[instrument(skip_all, name = "clinic.handlers.get_clinic", fields(clinic_id = %clinic_id))]
pub async fn get_clinic(
    State(state): State<Arc<AppState>>,
    Path(clinic_id): Path<Uuid>,
) -> Result<Json<ClinicRow>, ClinicError> {
    Ok(Json(ClinicsRepository::get_active(&state.pool, clinic_id).await?))
}

/// Handler for PATCH /api/v1/clinics/:clinic_id
#[instrument(skip_all, name = "clinic.handlers.update_clinic", fields(clinic_id = %clinic_id))]
pub async fn update_clinic(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(clinic_id): Path<Uuid>,
    Json(request): Json<UpdateClinicRequest>,
) -> Result<Json<ClinicRow>, ClinicError> {
    require_role(&user, &[Role::ClinicAdmin])?;
    ensure_same_clinic(&user, clinic_id)?;

    let current = ClinicsRepository::find_by_id(&state.pool, clinic_id)
        .await?
        .ok_or_else(|| ClinicError::NotFound("Clinic not found".to_string()))?;
    let fields = request.apply_to(&current)?;

    let updated = ClinicsRepository::update(&state.pool, clinic_id, &fields)
        .await?
        .ok_or_else(|| ClinicError::NotFound("Clinic not found".to_string()))?;

    info!(target: "clinic.handlers.clinics", clinic_id = %clinic_id, "Clinic updated");
    Ok(Json(updated))
}

/// Handler for POST /api/v1/clinics/:clinic_id/approve
#[instrument(skip_all, name = "clinic.handlers.approve_clinic", fields(clinic_id = %clinic_id))]
pub async fn approve_clinic(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(clinic_id): Path<Uuid>,
) -> Result<Json<ClinicRow>, ClinicError> {
    set_status(&state, &user, clinic_id, ClinicStatus::Active).await
}

/// Handler for POST /api/v1/clinics/:clinic_id/suspend
///
/// Existing tokens stay valid until expiry; logins and clinic-scoped lookups
/// stop working immediately.
#[instrument(skip_all, name = "clinic.handlers.suspend_clinic", fields(clinic_id = %clinic_id))]
pub async fn suspend_clinic(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(clinic_id): Path<Uuid>,
) -> Result<Json<ClinicRow>, ClinicError> {
    set_status(&state, &user, clinic_id, ClinicStatus::Suspended).await
}

async fn set_status(
    state: &AppState,
    user: &AuthUser,
    clinic_id: Uuid,
    status: ClinicStatus,
) -> Result<Json<ClinicRow>, ClinicError> {
    require_role(user, &[Role::SuperAdmin])?;
    let clinic =
        accounts::set_clinic_status(&state.pool, state.notifier.as_ref(), clinic_id, status)
            .await?;
    Ok(Json(clinic))
}
