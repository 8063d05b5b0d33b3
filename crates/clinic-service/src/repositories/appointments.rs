//! Appointment records.

use super::{conflict_on_unique, timed};
use crate::errors::ClinicError;
use crate::models::{AppointmentRow, AppointmentStatus};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgExecutor, PgPool};
use tracing::instrument;
use uuid::Uuid;

const APPOINTMENT_COLUMNS: &str = "appointment_id, clinic_id, doctor_id, patient_id, \
                                   scheduled_at, status, reason, created_by, \
                                   reminder_sent_at, created_at, updated_at";

/// Fields for a new booking.
#[derive(Debug)]
pub struct NewAppointment<'a> {
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub reason: Option<&'a str>,
    pub created_by: Uuid,
}

/// List filters. `None` means no restriction.
#[derive(Debug, Default, Clone, Copy)]
pub struct AppointmentFilter {
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
}

/// A booked appointment that needs a reminder, with contact details.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DueAppointmentReminder {
    pub appointment_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub patient_name: String,
    pub patient_email: Option<String>,
    pub patient_phone: Option<String>,
    pub doctor_name: String,
    pub clinic_name: String,
}

pub struct AppointmentsRepository;

impl AppointmentsRepository {
    #[instrument(skip_all, name = "clinic.repo.appointments.create")]
    pub async fn create(
        executor: impl PgExecutor<'_>,
        appointment: &NewAppointment<'_>,
    ) -> Result<AppointmentRow, ClinicError> {
        let sql = format!(
            "INSERT INTO appointments \
                 (clinic_id, doctor_id, patient_id, scheduled_at, reason, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {APPOINTMENT_COLUMNS}"
        );
        timed(
            "create_appointment",
            sqlx::query_as::<_, AppointmentRow>(&sql)
                .bind(appointment.clinic_id)
                .bind(appointment.doctor_id)
                .bind(appointment.patient_id)
                .bind(appointment.scheduled_at)
                .bind(appointment.reason)
                .bind(appointment.created_by)
                .fetch_one(executor),
        )
        .await
        .map_err(conflict_on_unique("The doctor is already booked at that time"))
    }

    /// Whether the doctor has a booked appointment at exactly `scheduled_at`.
    #[instrument(skip_all, name = "clinic.repo.appointments.slot_taken")]
    pub async fn slot_taken(
        executor: impl PgExecutor<'_>,
        doctor_id: Uuid,
        scheduled_at: DateTime<Utc>,
    ) -> Result<bool, ClinicError> {
        Ok(timed(
            "appointment_slot_taken",
            sqlx::query_scalar::<_, bool>(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM appointments
                    WHERE doctor_id = $1 AND scheduled_at = $2 AND status = 'booked'
                )
                "#,
            )
            .bind(doctor_id)
            .bind(scheduled_at)
            .fetch_one(executor),
        )
        .await?)
    }

    /// Whether the patient already has a booked appointment with the doctor that day.
    #[instrument(skip_all, name = "clinic.repo.appointments.patient_booked")]
    pub async fn patient_booked_on(
        executor: impl PgExecutor<'_>,
        doctor_id: Uuid,
        patient_id: Uuid,
        date: NaiveDate,
    ) -> Result<bool, ClinicError> {
        Ok(timed(
            "appointment_patient_booked",
            sqlx::query_scalar::<_, bool>(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM appointments
                    WHERE doctor_id = $1 AND patient_id = $2
                      AND (scheduled_at AT TIME ZONE 'UTC')::DATE = $3
                      AND status = 'booked'
                )
                "#,
            )
            .bind(doctor_id)
            .bind(patient_id)
            .bind(date)
            .fetch_one(executor),
        )
        .await?)
    }

    #[instrument(skip_all, name = "clinic.repo.appointments.find")]
    pub async fn find(
        executor: impl PgExecutor<'_>,
        clinic_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<Option<AppointmentRow>, ClinicError> {
        let sql = format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments \
             WHERE appointment_id = $1 AND clinic_id = $2"
        );
        Ok(timed(
            "find_appointment",
            sqlx::query_as::<_, AppointmentRow>(&sql)
                .bind(appointment_id)
                .bind(clinic_id)
                .fetch_optional(executor),
        )
        .await?)
    }

    #[instrument(skip_all, name = "clinic.repo.appointments.list")]
    pub async fn list(
        pool: &PgPool,
        clinic_id: Uuid,
        filter: AppointmentFilter,
    ) -> Result<Vec<AppointmentRow>, ClinicError> {
        let sql = format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments \
             WHERE clinic_id = $1 \
               AND ($2::UUID IS NULL OR doctor_id = $2) \
               AND ($3::UUID IS NULL OR patient_id = $3) \
               AND ($4::DATE IS NULL OR (scheduled_at AT TIME ZONE 'UTC')::DATE = $4) \
             ORDER BY scheduled_at"
        );
        Ok(timed(
            "list_appointments",
            sqlx::query_as::<_, AppointmentRow>(&sql)
                .bind(clinic_id)
                .bind(filter.doctor_id)
                .bind(filter.patient_id)
                .bind(filter.date)
                .fetch_all(pool),
        )
        .await?)
    }

    /// Move an appointment out of `booked`.
    ///
    /// Returns `None` when it is not currently booked.
    #[instrument(skip_all, name = "clinic.repo.appointments.close")]
    pub async fn close_booked(
        executor: impl PgExecutor<'_>,
        appointment_id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Option<AppointmentRow>, ClinicError> {
        let sql = format!(
            "UPDATE appointments SET status = $2, updated_at = NOW() \
             WHERE appointment_id = $1 AND status = 'booked' \
             RETURNING {APPOINTMENT_COLUMNS}"
        );
        Ok(timed(
            "close_appointment",
            sqlx::query_as::<_, AppointmentRow>(&sql)
                .bind(appointment_id)
                .bind(status)
                .fetch_optional(executor),
        )
        .await?)
    }

    /// Booked appointments starting in `(now, until]` without a reminder.
    #[instrument(skip_all, name = "clinic.repo.appointments.due_reminders")]
    pub async fn due_for_reminder(
        pool: &PgPool,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DueAppointmentReminder>, ClinicError> {
        Ok(timed(
            "due_appointment_reminders",
            sqlx::query_as::<_, DueAppointmentReminder>(
                r#"
                SELECT
                    a.appointment_id,
                    a.scheduled_at,
                    p.full_name AS patient_name,
                    p.email AS patient_email,
                    p.phone AS patient_phone,
                    d.full_name AS doctor_name,
                    c.name AS clinic_name
                FROM appointments a
                JOIN users p ON p.user_id = a.patient_id
                JOIN users d ON d.user_id = a.doctor_id
                JOIN clinics c ON c.clinic_id = a.clinic_id
                WHERE a.status = 'booked'
                  AND a.reminder_sent_at IS NULL
                  AND a.scheduled_at > $1
                  AND a.scheduled_at <= $2
                ORDER BY a.scheduled_at
                LIMIT $3
                "#,
            )
            .bind(now)
            .bind(until)
            .bind(limit)
            .fetch_all(pool),
        )
        .await?)
    }

    #[instrument(skip_all, name = "clinic.repo.appointments.mark_reminded")]
    pub async fn mark_reminder_sent(
        pool: &PgPool,
        appointment_id: Uuid,
    ) -> Result<(), ClinicError> {
        timed(
            "mark_appointment_reminded",
            sqlx::query(
                "UPDATE appointments SET reminder_sent_at = NOW(), updated_at = NOW() \
                 WHERE appointment_id = $1",
            )
            .bind(appointment_id)
            .execute(pool),
        )
        .await?;
        Ok(())
    }
}
