//! Booking and cancellation.

use crate::errors::ClinicError;
use crate::models::{
    AccountStatus, AppointmentRow, AppointmentStatus, BookingResponse, QueueTokenRow, TokenStatus,
    UserRow,
};
use crate::repositories::appointments::NewAppointment;
use crate::repositories::{
    AppointmentsRepository, ClinicsRepository, QueueTokensRepository, UsersRepository,
};
use crate::services::notifier::{notify_best_effort, Notification, Notifier};
use crate::services::queue_broadcaster::{QueueBroadcaster, QueueKey};
use crate::services::queue_service::{self, QueueService, RecalcTrigger};
use chrono::{DateTime, Utc};
use common::types::{ClinicId, Role, UserId};
use sqlx::PgPool;
use tracing::{info, instrument};
use uuid::Uuid;

/// Book an appointment and issue its queue token.
///
/// The appointment, its token and the recalculated queue commit together.
#[instrument(skip_all, name = "clinic.appointments.book", fields(doctor_id = %booking.doctor_id))]
pub async fn book(
    pool: &PgPool,
    broadcaster: &QueueBroadcaster,
    notifier: &dyn Notifier,
    booking: &NewAppointment<'_>,
    now: DateTime<Utc>,
) -> Result<BookingResponse, ClinicError> {
    let clinic = ClinicsRepository::get_active(pool, booking.clinic_id).await?;
    let doctor = approved_member(pool, booking.clinic_id, booking.doctor_id, Role::Doctor)
        .await?
        .ok_or_else(|| ClinicError::NotFound("Doctor not found".to_string()))?;
    let patient = approved_member(pool, booking.clinic_id, booking.patient_id, Role::Patient)
        .await?
        .ok_or_else(|| ClinicError::NotFound("Patient not found".to_string()))?;

    if booking.scheduled_at <= now {
        return Err(ClinicError::BadRequest(
            "scheduled_at must be in the future".to_string(),
        ));
    }
    if !clinic.is_open_at(booking.scheduled_at) {
        return Err(ClinicError::BadRequest(format!(
            "The clinic is open from {} to {}",
            clinic.opening_time.format("%H:%M"),
            clinic.closing_time.format("%H:%M")
        )));
    }

    let date = booking.scheduled_at.date_naive();
    let key = QueueKey::new(ClinicId(clinic.clinic_id), UserId(doctor.user_id), date);

    let mut tx = pool.begin().await?;
    if AppointmentsRepository::slot_taken(&mut *tx, doctor.user_id, booking.scheduled_at).await? {
        return Err(ClinicError::Conflict(
            "The doctor is already booked at that time".to_string(),
        ));
    }
    if AppointmentsRepository::patient_booked_on(
        &mut *tx,
        doctor.user_id,
        patient.user_id,
        date,
    )
    .await?
    {
        return Err(ClinicError::Conflict(
            "The patient already has an appointment with this doctor that day".to_string(),
        ));
    }

    let appointment = AppointmentsRepository::create(&mut *tx, booking).await?;
    let token = queue_service::issue_token(&mut tx, &appointment).await?;
    let state = queue_service::recalculate_locked(&mut tx, key, now).await?;
    tx.commit().await?;

    QueueService::new(pool, broadcaster).publish(key, &state, RecalcTrigger::Booking, now);

    let token = state
        .tokens
        .iter()
        .find(|t| t.token_id == token.token_id)
        .cloned()
        .unwrap_or(token);

    info!(
        target: "clinic.appointments",
        appointment_id = %appointment.appointment_id,
        token_number = token.token_number,
        "Appointment booked"
    );

    let body = format!(
        "{}: appointment with {} on {} UTC confirmed. Your token is {}.",
        clinic.name,
        doctor.full_name,
        appointment.scheduled_at.format("%Y-%m-%d %H:%M"),
        token.token_number
    );
    if let Some(notification) = Notification::to_contact(
        patient.phone.as_deref(),
        patient.email.as_deref(),
        "Appointment confirmed",
        body,
    ) {
        notify_best_effort(notifier, "booking", notification).await;
    }

    Ok(BookingResponse { appointment, token })
}

/// Cancel a booked appointment and take its token out of the queue.
#[instrument(skip_all, name = "clinic.appointments.cancel", fields(appointment_id = %appointment.appointment_id))]
pub async fn cancel(
    pool: &PgPool,
    broadcaster: &QueueBroadcaster,
    appointment: &AppointmentRow,
    now: DateTime<Utc>,
) -> Result<AppointmentRow, ClinicError> {
    let mut tx = pool.begin().await?;

    let cancelled = AppointmentsRepository::close_booked(
        &mut *tx,
        appointment.appointment_id,
        AppointmentStatus::Cancelled,
    )
    .await?
    .ok_or_else(|| {
        ClinicError::Conflict("Only booked appointments can be cancelled".to_string())
    })?;

    let token = cancel_token(&mut tx, appointment.appointment_id).await?;
    let state = match &token {
        Some(token) => {
            Some(queue_service::recalculate_locked(&mut tx, queue_service::key_for(token), now).await?)
        }
        None => None,
    };
    tx.commit().await?;

    if let (Some(token), Some(state)) = (token, state) {
        QueueService::new(pool, broadcaster).publish(
            queue_service::key_for(&token),
            &state,
            RecalcTrigger::Cancel,
            now,
        );
    }

    info!(target: "clinic.appointments", "Appointment cancelled");
    Ok(cancelled)
}

async fn cancel_token(
    conn: &mut sqlx::PgConnection,
    appointment_id: Uuid,
) -> Result<Option<QueueTokenRow>, ClinicError> {
    let Some(token) = QueueTokensRepository::find_by_appointment(&mut *conn, appointment_id).await?
    else {
        return Ok(None);
    };

    QueueTokensRepository::transition(
        &mut *conn,
        token.token_id,
        &[
            TokenStatus::Waiting,
            TokenStatus::CheckedIn,
            TokenStatus::InConsultation,
        ],
        TokenStatus::Cancelled,
    )
    .await?;

    Ok(Some(token))
}

async fn approved_member(
    pool: &PgPool,
    clinic_id: Uuid,
    user_id: Uuid,
    role: Role,
) -> Result<Option<UserRow>, ClinicError> {
    Ok(
        UsersRepository::find_in_clinic(pool, clinic_id, user_id, Some(role))
            .await?
            .filter(|user| user.status == AccountStatus::Approved),
    )
}
