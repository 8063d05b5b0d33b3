//! Emergency request handlers.

use crate::errors::ClinicError;
use crate::middleware::{require_role, AuthUser};
use crate::models::{
    CreateEmergencyRequest, EmergencyListQuery, EmergencyRequestRow, UpdateEmergencyRequest,
};
use crate::repositories::{ClinicsRepository, EmergencyRequestsRepository};
use crate::routes::AppState;
use crate::services::emergencies;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use common::types::Role;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Handler for POST /api/v1/emergencies
///
/// The request is stored even when the clinic cannot be alerted.
#[instrument(skip_all, name = "clinic.handlers.create_emergency")]
pub async fn create_emergency(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<CreateEmergencyRequest>,
) -> Result<(StatusCode, Json<EmergencyRequestRow>), ClinicError> {
    require_role(&user, &[Role::Patient])?;
    let description = request.validate()?;
    let clinic = ClinicsRepository::get_active(&state.pool, user.clinic()?).await?;
    let location = request.latitude.zip(request.longitude);

    let created = emergencies::raise(
        &state.pool,
        state.notifier.as_ref(),
        &clinic,
        user.user_id,
        &description,
        request.severity,
        location,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Handler for GET /api/v1/emergencies?status=
#[instrument(skip_all, name = "clinic.handlers.list_emergencies")]
pub async fn list_emergencies(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<EmergencyListQuery>,
) -> Result<Json<Vec<EmergencyRequestRow>>, ClinicError> {
    require_role(&user, &[Role::Patient, Role::Staff, Role::ClinicAdmin])?;
    let patient_id = user.is_patient().then_some(user.user_id);
    Ok(Json(
        EmergencyRequestsRepository::list(&state.pool, user.clinic()?, query.status, patient_id)
            .await?,
    ))
}

/// Handler for PATCH /api/v1/emergencies/:request_id
///
/// # Response
///
/// - 200 OK: updated request
/// - 404 Not Found: no such request in the clinic
/// - 409 Conflict: transition not allowed from the current status
#[instrument(skip_all, name = "clinic.handlers.update_emergency", fields(request_id = %request_id))]
pub async fn update_emergency(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(request_id): Path<Uuid>,
    Json(request): Json<UpdateEmergencyRequest>,
) -> Result<Json<EmergencyRequestRow>, ClinicError> {
    require_role(&user, &[Role::Staff, Role::ClinicAdmin])?;
    let updated = emergencies::transition(
        &state.pool,
        user.clinic()?,
        request_id,
        request.status,
        user.user_id,
    )
    .await?;
    Ok(Json(updated))
}
