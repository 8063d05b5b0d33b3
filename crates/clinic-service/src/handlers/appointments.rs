//! Appointment handlers.
//!
//! Visibility follows the caller's role: patients see their own
//! appointments, doctors the ones booked with them, staff and admins the
//! whole clinic. Anything outside that view is reported as not found.

use crate::errors::ClinicError;
use crate::middleware::{require_role, AuthUser};
use crate::models::{
    AppointmentListQuery, AppointmentRow, BookingResponse, CreateAppointmentRequest,
};
use crate::repositories::appointments::{AppointmentFilter, NewAppointment};
use crate::repositories::AppointmentsRepository;
use crate::routes::AppState;
use crate::services::appointments;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use common::types::Role;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Whether `user` may see `appointment`.
fn visible_to(user: &AuthUser, appointment: &AppointmentRow) -> bool {
    if user.clinic_id != Some(appointment.clinic_id) {
        return false;
    }
    match user.role {
        Role::Patient => appointment.patient_id == user.user_id,
        Role::Doctor => appointment.doctor_id == user.user_id,
        Role::Staff | Role::ClinicAdmin => true,
        Role::SuperAdmin => false,
    }
}

async fn load_visible(
    state: &AppState,
    user: &AuthUser,
    appointment_id: Uuid,
) -> Result<AppointmentRow, ClinicError> {
    let clinic_id = user.clinic()?;
    AppointmentsRepository::find(&state.pool, clinic_id, appointment_id)
        .await?
        .filter(|a| visible_to(user, a))
        .ok_or_else(|| ClinicError::NotFound("Appointment not found".to_string()))
}

/// Handler for POST /api/v1/appointments
///
/// # Response
///
/// - 201 Created: appointment and its queue token
/// - 400 Bad Request: past time, outside opening hours
/// - 403 Forbidden: caller may not book
/// - 404 Not Found: doctor or patient not in this clinic
/// - 409 Conflict: slot taken or patient already booked that day
#[instrument(skip_all, name = "clinic.handlers.create_appointment", fields(doctor_id = %request.doctor_id))]
pub async fn create_appointment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<BookingResponse>), ClinicError> {
    require_role(&user, &[Role::Patient, Role::Staff, Role::ClinicAdmin])?;
    let clinic_id = user.clinic()?;
    let now = Utc::now();
    let reason = request.validate(now)?;

    let patient_id = if user.is_patient() {
        user.user_id
    } else {
        request.patient_id.ok_or_else(|| {
            ClinicError::BadRequest("patient_id is required for staff bookings".to_string())
        })?
    };

    let booking = NewAppointment {
        clinic_id,
        doctor_id: request.doctor_id,
        patient_id,
        scheduled_at: request.scheduled_at,
        reason: reason.as_deref(),
        created_by: user.user_id,
    };

    let response = appointments::book(
        &state.pool,
        &state.broadcaster,
        state.notifier.as_ref(),
        &booking,
        now,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Handler for GET /api/v1/appointments?date=&doctor_id=
#[instrument(skip_all, name = "clinic.handlers.list_appointments")]
pub async fn list_appointments(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<AppointmentListQuery>,
) -> Result<Json<Vec<AppointmentRow>>, ClinicError> {
    let clinic_id = user.clinic()?;

    let mut filter = AppointmentFilter {
        doctor_id: query.doctor_id,
        patient_id: None,
        date: query.date,
    };
    match user.role {
        Role::Patient => filter.patient_id = Some(user.user_id),
        Role::Doctor => filter.doctor_id = Some(user.user_id),
        _ => {}
    }

    Ok(Json(
        AppointmentsRepository::list(&state.pool, clinic_id, filter).await?,
    ))
}

/// Handler for GET /api/v1/appointments/:appointment_id
#[instrument(skip_all, name = "clinic.handlers.get_appointment", fields(appointment_id = %appointment_id))]
pub async fn get_appointment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<AppointmentRow>, ClinicError> {
    Ok(Json(load_visible(&state, &user, appointment_id).await?))
}

/// Handler for POST /api/v1/appointments/:appointment_id/cancel
///
/// Patients may cancel their own; staff and admins any in the clinic.
#[instrument(skip_all, name = "clinic.handlers.cancel_appointment", fields(appointment_id = %appointment_id))]
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<AppointmentRow>, ClinicError> {
    require_role(&user, &[Role::Patient, Role::Staff, Role::ClinicAdmin])?;
    let appointment = load_visible(&state, &user, appointment_id).await?;
    let cancelled =
        appointments::cancel(&state.pool, &state.broadcaster, &appointment, Utc::now()).await?;
    Ok(Json(cancelled))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::AppointmentStatus;

    fn appointment(clinic_id: Uuid, doctor_id: Uuid, patient_id: Uuid) -> AppointmentRow {
        let now = Utc::now();
        AppointmentRow {
            appointment_id: Uuid::new_v4(),
            clinic_id,
            doctor_id,
            patient_id,
            scheduled_at: now,
            status: AppointmentStatus::Booked,
            reason: None,
            created_by: patient_id,
            reminder_sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn caller(role: Role, clinic_id: Uuid) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            clinic_id: Some(clinic_id),
            role,
        }
    }

    #[test]
    fn test_visibility_by_role() {
        let clinic = Uuid::new_v4();
        let patient = caller(Role::Patient, clinic);
        let doctor = caller(Role::Doctor, clinic);
        let staff = caller(Role::Staff, clinic);

        let own = appointment(clinic, doctor.user_id, patient.user_id);
        assert!(visible_to(&patient, &own));
        assert!(visible_to(&doctor, &own));
        assert!(visible_to(&staff, &own));

        let other = appointment(clinic, Uuid::new_v4(), Uuid::new_v4());
        assert!(!visible_to(&patient, &other));
        assert!(!visible_to(&doctor, &other));
        assert!(visible_to(&staff, &other));
    }

    #[test]
    fn test_other_clinic_is_invisible() {
        let staff = caller(Role::ClinicAdmin, Uuid::new_v4());
        let elsewhere = appointment(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        assert!(!visible_to(&staff, &elsewhere));
    }
}
