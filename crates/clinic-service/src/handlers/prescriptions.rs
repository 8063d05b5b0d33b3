//! Prescription handlers.

use crate::errors::ClinicError;
use crate::middleware::{require_role, AuthUser};
use crate::models::{CreatePrescriptionRequest, PrescriptionListQuery, PrescriptionResponse};
use crate::repositories::PrescriptionsRepository;
use crate::routes::AppState;
use crate::services::prescriptions::{self, PrescriptionHeader};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use common::types::Role;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Handler for POST /api/v1/prescriptions
///
/// Doctors only. Every medicine must be active in the doctor's clinic.
#[instrument(skip_all, name = "clinic.handlers.create_prescription")]
pub async fn create_prescription(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<CreatePrescriptionRequest>,
) -> Result<(StatusCode, Json<PrescriptionResponse>), ClinicError> {
    require_role(&user, &[Role::Doctor])?;
    let (notes, items) = request.validate()?;

    let header = PrescriptionHeader {
        clinic_id: user.clinic()?,
        doctor_id: user.user_id,
        patient_id: request.patient_id,
        appointment_id: request.appointment_id,
        notes: notes.as_deref(),
    };
    let created = prescriptions::create(&state.pool, header, &items).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Handler for GET /api/v1/prescriptions?patient_id=
///
/// Patients always get their own; the filter is ignored for them.
#[instrument(skip_all, name = "clinic.handlers.list_prescriptions")]
pub async fn list_prescriptions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<PrescriptionListQuery>,
) -> Result<Json<Vec<PrescriptionResponse>>, ClinicError> {
    let clinic_id = user.clinic()?;
    let patient_id = if user.is_patient() {
        Some(user.user_id)
    } else {
        query.patient_id
    };
    Ok(Json(
        PrescriptionsRepository::list(&state.pool, clinic_id, patient_id).await?,
    ))
}

/// Handler for GET /api/v1/prescriptions/:prescription_id
#[instrument(skip_all, name = "clinic.handlers.get_prescription", fields(prescription_id = %prescription_id))]
pub async fn get_prescription(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(prescription_id): Path<Uuid>,
) -> Result<Json<PrescriptionResponse>, ClinicError> {
    PrescriptionsRepository::find(&state.pool, user.clinic()?, prescription_id)
        .await?
        .filter(|p| !user.is_patient() || p.prescription.patient_id == user.user_id)
        .map(Json)
        .ok_or_else(|| ClinicError::NotFound("Prescription not found".to_string()))
}
