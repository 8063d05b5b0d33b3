//! Medicine reminders.

use super::timed;
use crate::errors::ClinicError;
use crate::models::{format_times_of_day, MedicineReminderRow, NewReminder};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

const REMINDER_COLUMNS: &str = "reminder_id, clinic_id, patient_id, medicine_name, dosage, \
                                times_of_day, start_date, end_date, channel, is_active, \
                                next_fire_at, last_sent_at, created_by, created_at";

/// A reminder that is due, with the patient's contact details.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DueReminder {
    #[sqlx(flatten)]
    pub reminder: MedicineReminderRow,
    pub patient_name: String,
    pub patient_email: Option<String>,
    pub patient_phone: Option<String>,
}

pub struct RemindersRepository;

impl RemindersRepository {
    #[instrument(skip_all, name = "clinic.repo.reminders.create")]
    pub async fn create(
        pool: &PgPool,
        clinic_id: Uuid,
        patient_id: Uuid,
        reminder: &NewReminder,
        next_fire_at: Option<DateTime<Utc>>,
        created_by: Uuid,
    ) -> Result<MedicineReminderRow, ClinicError> {
        let sql = format!(
            "INSERT INTO medicine_reminders (clinic_id, patient_id, medicine_name, dosage, \
                 times_of_day, start_date, end_date, channel, is_active, next_fire_at, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {REMINDER_COLUMNS}"
        );
        Ok(timed(
            "create_reminder",
            sqlx::query_as::<_, MedicineReminderRow>(&sql)
                .bind(clinic_id)
                .bind(patient_id)
                .bind(&reminder.medicine_name)
                .bind(&reminder.dosage)
                .bind(format_times_of_day(&reminder.times_of_day))
                .bind(reminder.start_date)
                .bind(reminder.end_date)
                .bind(reminder.channel)
                .bind(next_fire_at.is_some())
                .bind(next_fire_at)
                .bind(created_by)
                .fetch_one(pool),
        )
        .await?)
    }

    #[instrument(skip_all, name = "clinic.repo.reminders.find")]
    pub async fn find(
        pool: &PgPool,
        clinic_id: Uuid,
        reminder_id: Uuid,
    ) -> Result<Option<MedicineReminderRow>, ClinicError> {
        let sql = format!(
            "SELECT {REMINDER_COLUMNS} FROM medicine_reminders \
             WHERE reminder_id = $1 AND clinic_id = $2"
        );
        Ok(timed(
            "find_reminder",
            sqlx::query_as::<_, MedicineReminderRow>(&sql)
                .bind(reminder_id)
                .bind(clinic_id)
                .fetch_optional(pool),
        )
        .await?)
    }

    /// Reminders of a clinic, optionally for one patient; active first.
    #[instrument(skip_all, name = "clinic.repo.reminders.list")]
    pub async fn list(
        pool: &PgPool,
        clinic_id: Uuid,
        patient_id: Option<Uuid>,
    ) -> Result<Vec<MedicineReminderRow>, ClinicError> {
        let sql = format!(
            "SELECT {REMINDER_COLUMNS} FROM medicine_reminders \
             WHERE clinic_id = $1 AND ($2::UUID IS NULL OR patient_id = $2) \
             ORDER BY is_active DESC, created_at DESC"
        );
        Ok(timed(
            "list_reminders",
            sqlx::query_as::<_, MedicineReminderRow>(&sql)
                .bind(clinic_id)
                .bind(patient_id)
                .fetch_all(pool),
        )
        .await?)
    }

    /// Returns false if the reminder was already inactive or does not exist.
    #[instrument(skip_all, name = "clinic.repo.reminders.deactivate")]
    pub async fn deactivate(
        pool: &PgPool,
        clinic_id: Uuid,
        reminder_id: Uuid,
    ) -> Result<bool, ClinicError> {
        let result = timed(
            "deactivate_reminder",
            sqlx::query(
                r#"
                UPDATE medicine_reminders
                SET is_active = FALSE, next_fire_at = NULL, updated_at = NOW()
                WHERE reminder_id = $1 AND clinic_id = $2 AND is_active
                "#,
            )
            .bind(reminder_id)
            .bind(clinic_id)
            .execute(pool),
        )
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Active reminders whose `next_fire_at` has passed.
    #[instrument(skip_all, name = "clinic.repo.reminders.due")]
    pub async fn due(
        pool: &PgPool,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DueReminder>, ClinicError> {
        Ok(timed(
            "due_reminders",
            sqlx::query_as::<_, DueReminder>(
                r#"
                SELECT r.reminder_id, r.clinic_id, r.patient_id, r.medicine_name, r.dosage,
                       r.times_of_day, r.start_date, r.end_date, r.channel, r.is_active,
                       r.next_fire_at, r.last_sent_at, r.created_by, r.created_at,
                       u.full_name AS patient_name,
                       u.email AS patient_email,
                       u.phone AS patient_phone
                FROM medicine_reminders r
                JOIN users u ON u.user_id = r.patient_id
                WHERE r.is_active AND r.next_fire_at <= $1
                ORDER BY r.next_fire_at
                LIMIT $2
                "#,
            )
            .bind(now)
            .bind(limit)
            .fetch_all(pool),
        )
        .await?)
    }

    /// Record a fire. `next = None` deactivates the reminder.
    #[instrument(skip_all, name = "clinic.repo.reminders.advance")]
    pub async fn advance(
        pool: &PgPool,
        reminder_id: Uuid,
        sent_at: Option<DateTime<Utc>>,
        next: Option<DateTime<Utc>>,
    ) -> Result<(), ClinicError> {
        timed(
            "advance_reminder",
            sqlx::query(
                r#"
                UPDATE medicine_reminders
                SET last_sent_at = COALESCE($2, last_sent_at),
                    next_fire_at = $3,
                    is_active = ($3 IS NOT NULL),
                    updated_at = NOW()
                WHERE reminder_id = $1
                "#,
            )
            .bind(reminder_id)
            .bind(sent_at)
            .bind(next)
            .execute(pool),
        )
        .await?;
        Ok(())
    }
}
