//! Doctor delay reports.

use super::timed;
use crate::errors::ClinicError;
use crate::models::DelayNotificationRow;
use chrono::NaiveDate;
use sqlx::{PgExecutor, PgPool};
use tracing::instrument;
use uuid::Uuid;

pub struct DelayNotificationsRepository;

impl DelayNotificationsRepository {
    #[instrument(skip_all, name = "clinic.repo.delays.create")]
    pub async fn create(
        executor: impl PgExecutor<'_>,
        clinic_id: Uuid,
        doctor_id: Uuid,
        queue_date: NaiveDate,
        delay_minutes: i32,
        reason: Option<&str>,
        reported_by: Uuid,
    ) -> Result<DelayNotificationRow, ClinicError> {
        Ok(timed(
            "create_delay",
            sqlx::query_as::<_, DelayNotificationRow>(
                r#"
                INSERT INTO delay_notifications
                    (clinic_id, doctor_id, queue_date, delay_minutes, reason, reported_by)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING delay_id, clinic_id, doctor_id, queue_date, delay_minutes,
                          reason, reported_by, notified_count, created_at
                "#,
            )
            .bind(clinic_id)
            .bind(doctor_id)
            .bind(queue_date)
            .bind(delay_minutes)
            .bind(reason)
            .bind(reported_by)
            .fetch_one(executor),
        )
        .await?)
    }

    /// Total reported delay for a doctor's day.
    #[instrument(skip_all, name = "clinic.repo.delays.total")]
    pub async fn total_minutes(
        executor: impl PgExecutor<'_>,
        doctor_id: Uuid,
        queue_date: NaiveDate,
    ) -> Result<i32, ClinicError> {
        Ok(timed(
            "total_delay",
            sqlx::query_scalar::<_, i32>(
                r#"
                SELECT COALESCE(SUM(delay_minutes), 0)::INT4 FROM delay_notifications
                WHERE doctor_id = $1 AND queue_date = $2
                "#,
            )
            .bind(doctor_id)
            .bind(queue_date)
            .fetch_one(executor),
        )
        .await?)
    }

    #[instrument(skip_all, name = "clinic.repo.delays.set_notified")]
    pub async fn set_notified_count(
        pool: &PgPool,
        delay_id: Uuid,
        notified_count: i32,
    ) -> Result<DelayNotificationRow, ClinicError> {
        Ok(timed(
            "set_delay_notified",
            sqlx::query_as::<_, DelayNotificationRow>(
                r#"
                UPDATE delay_notifications SET notified_count = $2
                WHERE delay_id = $1
                RETURNING delay_id, clinic_id, doctor_id, queue_date, delay_minutes,
                          reason, reported_by, notified_count, created_at
                "#,
            )
            .bind(delay_id)
            .bind(notified_count)
            .fetch_one(pool),
        )
        .await?)
    }
}
