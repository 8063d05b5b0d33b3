//! Medicine reminder handlers.
//!
//! Patients manage their own reminders; clinic members can set them up on a
//! patient's behalf. Delivery happens in the reminder scheduler task.

use crate::errors::ClinicError;
use crate::middleware::AuthUser;
use crate::models::{
    AccountStatus, CreateReminderRequest, MedicineReminderRow, ReminderListQuery,
};
use crate::repositories::{RemindersRepository, UsersRepository};
use crate::routes::AppState;
use crate::services::reminder_schedule;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use common::types::Role;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// The patient a reminder is for: the caller, or the named patient for
/// clinic members.
async fn reminder_patient(
    state: &AppState,
    user: &AuthUser,
    requested: Option<Uuid>,
) -> Result<Uuid, ClinicError> {
    if user.is_patient() {
        return Ok(user.user_id);
    }
    if !user.is_clinic_member() {
        return Err(ClinicError::Forbidden(
            "Your role cannot perform this action".to_string(),
        ));
    }

    let patient_id = requested.ok_or_else(|| {
        ClinicError::BadRequest("patient_id is required".to_string())
    })?;
    UsersRepository::find_in_clinic(&state.pool, user.clinic()?, patient_id, Some(Role::Patient))
        .await?
        .filter(|p| p.status == AccountStatus::Approved)
        .map(|p| p.user_id)
        .ok_or_else(|| ClinicError::NotFound("Patient not found".to_string()))
}

/// Handler for POST /api/v1/reminders
///
/// A reminder whose window has already closed is stored inactive.
#[instrument(skip_all, name = "clinic.handlers.create_reminder")]
pub async fn create_reminder(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<CreateReminderRequest>,
) -> Result<(StatusCode, Json<MedicineReminderRow>), ClinicError> {
    let clinic_id = user.clinic()?;
    let now = Utc::now();
    let reminder = request.validate(now.date_naive())?;
    let patient_id = reminder_patient(&state, &user, request.patient_id).await?;

    let next_fire_at = reminder_schedule::first_fire_at(
        &reminder.times_of_day,
        reminder.start_date,
        reminder.end_date,
        now,
    );

    let created = RemindersRepository::create(
        &state.pool,
        clinic_id,
        patient_id,
        &reminder,
        next_fire_at,
        user.user_id,
    )
    .await?;

    info!(
        target: "clinic.handlers.reminders",
        reminder_id = %created.reminder_id,
        next_fire_at = ?created.next_fire_at,
        "Reminder created"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

/// Handler for GET /api/v1/reminders?patient_id=
#[instrument(skip_all, name = "clinic.handlers.list_reminders")]
pub async fn list_reminders(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ReminderListQuery>,
) -> Result<Json<Vec<MedicineReminderRow>>, ClinicError> {
    let clinic_id = user.clinic()?;
    let patient_id = if user.is_patient() {
        Some(user.user_id)
    } else {
        query.patient_id
    };
    Ok(Json(
        RemindersRepository::list(&state.pool, clinic_id, patient_id).await?,
    ))
}

/// Handler for DELETE /api/v1/reminders/:reminder_id
///
/// Deactivates; history stays.
#[instrument(skip_all, name = "clinic.handlers.delete_reminder", fields(reminder_id = %reminder_id))]
pub async fn delete_reminder(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(reminder_id): Path<Uuid>,
) -> Result<StatusCode, ClinicError> {
    let clinic_id = user.clinic()?;
    let not_found = || ClinicError::NotFound("Reminder not found".to_string());

    let reminder = RemindersRepository::find(&state.pool, clinic_id, reminder_id)
        .await?
        .filter(|r| !user.is_patient() || r.patient_id == user.user_id)
        .ok_or_else(not_found)?;

    if RemindersRepository::deactivate(&state.pool, clinic_id, reminder.reminder_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found())
    }
}
