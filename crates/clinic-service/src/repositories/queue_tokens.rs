//! Queue tokens.
//!
//! Every read joins `users` for the patient's display name, so writes use a
//! data-modifying CTE and select the joined row in the same statement.

use super::timed;
use crate::errors::ClinicError;
use crate::models::{QueueTokenRow, TokenStatus};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, PgExecutor, PgPool};
use tracing::instrument;
use uuid::Uuid;

const TOKEN_SELECT: &str = "SELECT t.token_id, t.clinic_id, t.doctor_id, t.patient_id, \
                                   u.full_name AS patient_name, t.appointment_id, t.queue_date, \
                                   t.token_number, t.scheduled_at, t.status, \
                                   t.estimated_wait_minutes, t.estimated_call_at, \
                                   t.checked_in_at, t.called_at, t.served_at, t.created_at";

/// Fields for a new token. The number is provisional until the next
/// recalculation.
#[derive(Debug, Clone, Copy)]
pub struct NewQueueToken {
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub queue_date: NaiveDate,
    pub token_number: i32,
    pub scheduled_at: DateTime<Utc>,
}

pub struct QueueTokensRepository;

impl QueueTokensRepository {
    #[instrument(skip_all, name = "clinic.repo.queue.create")]
    pub async fn create(
        executor: impl PgExecutor<'_>,
        token: &NewQueueToken,
    ) -> Result<QueueTokenRow, ClinicError> {
        let sql = format!(
            "WITH t AS ( \
                 INSERT INTO queue_tokens (clinic_id, doctor_id, patient_id, appointment_id, \
                                           queue_date, token_number, scheduled_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING * \
             ) {TOKEN_SELECT} FROM t JOIN users u ON u.user_id = t.patient_id"
        );
        Ok(timed(
            "create_queue_token",
            sqlx::query_as::<_, QueueTokenRow>(&sql)
                .bind(token.clinic_id)
                .bind(token.doctor_id)
                .bind(token.patient_id)
                .bind(token.appointment_id)
                .bind(token.queue_date)
                .bind(token.token_number)
                .bind(token.scheduled_at)
                .fetch_one(executor),
        )
        .await?)
    }

    /// Highest number handed out in a queue, cancelled tokens included.
    #[instrument(skip_all, name = "clinic.repo.queue.max_number")]
    pub async fn max_number(
        executor: impl PgExecutor<'_>,
        doctor_id: Uuid,
        queue_date: NaiveDate,
    ) -> Result<i32, ClinicError> {
        Ok(timed(
            "max_queue_number",
            sqlx::query_scalar::<_, i32>(
                r#"
                SELECT COALESCE(MAX(token_number), 0)::INT4 FROM queue_tokens
                WHERE doctor_id = $1 AND queue_date = $2
                "#,
            )
            .bind(doctor_id)
            .bind(queue_date)
            .fetch_one(executor),
        )
        .await?)
    }

    #[instrument(skip_all, name = "clinic.repo.queue.find")]
    pub async fn find(
        executor: impl PgExecutor<'_>,
        token_id: Uuid,
    ) -> Result<Option<QueueTokenRow>, ClinicError> {
        let sql = format!(
            "{TOKEN_SELECT} FROM queue_tokens t JOIN users u ON u.user_id = t.patient_id \
             WHERE t.token_id = $1"
        );
        Ok(timed(
            "find_queue_token",
            sqlx::query_as::<_, QueueTokenRow>(&sql)
                .bind(token_id)
                .fetch_optional(executor),
        )
        .await?)
    }

    #[instrument(skip_all, name = "clinic.repo.queue.find_by_appointment")]
    pub async fn find_by_appointment(
        executor: impl PgExecutor<'_>,
        appointment_id: Uuid,
    ) -> Result<Option<QueueTokenRow>, ClinicError> {
        let sql = format!(
            "{TOKEN_SELECT} FROM queue_tokens t JOIN users u ON u.user_id = t.patient_id \
             WHERE t.appointment_id = $1"
        );
        Ok(timed(
            "find_queue_token_by_appointment",
            sqlx::query_as::<_, QueueTokenRow>(&sql)
                .bind(appointment_id)
                .fetch_optional(executor),
        )
        .await?)
    }

    /// All tokens of a queue, in creation order.
    #[instrument(skip_all, name = "clinic.repo.queue.list")]
    pub async fn list_queue(
        pool: &PgPool,
        doctor_id: Uuid,
        queue_date: NaiveDate,
    ) -> Result<Vec<QueueTokenRow>, ClinicError> {
        let sql = format!(
            "{TOKEN_SELECT} FROM queue_tokens t JOIN users u ON u.user_id = t.patient_id \
             WHERE t.doctor_id = $1 AND t.queue_date = $2 \
             ORDER BY t.created_at, t.token_id"
        );
        Ok(timed(
            "list_queue",
            sqlx::query_as::<_, QueueTokenRow>(&sql)
                .bind(doctor_id)
                .bind(queue_date)
                .fetch_all(pool),
        )
        .await?)
    }

    /// All tokens of a queue, row-locked for the rest of the transaction.
    #[instrument(skip_all, name = "clinic.repo.queue.lock")]
    pub async fn lock_queue(
        conn: &mut PgConnection,
        doctor_id: Uuid,
        queue_date: NaiveDate,
    ) -> Result<Vec<QueueTokenRow>, ClinicError> {
        let sql = format!(
            "{TOKEN_SELECT} FROM queue_tokens t JOIN users u ON u.user_id = t.patient_id \
             WHERE t.doctor_id = $1 AND t.queue_date = $2 \
             ORDER BY t.created_at, t.token_id \
             FOR UPDATE OF t"
        );
        Ok(timed(
            "lock_queue",
            sqlx::query_as::<_, QueueTokenRow>(&sql)
                .bind(doctor_id)
                .bind(queue_date)
                .fetch_all(conn),
        )
        .await?)
    }

    /// Write back a recalculated number and estimate.
    #[instrument(skip_all, name = "clinic.repo.queue.save_estimate")]
    pub async fn save_position(
        executor: impl PgExecutor<'_>,
        token: &QueueTokenRow,
    ) -> Result<(), ClinicError> {
        timed(
            "save_queue_position",
            sqlx::query(
                r#"
                UPDATE queue_tokens
                SET token_number = $2,
                    estimated_wait_minutes = $3,
                    estimated_call_at = $4,
                    updated_at = NOW()
                WHERE token_id = $1
                "#,
            )
            .bind(token.token_id)
            .bind(token.token_number)
            .bind(token.estimated_wait_minutes)
            .bind(token.estimated_call_at)
            .execute(executor),
        )
        .await?;
        Ok(())
    }

    /// Move a token to `to` if its current status is one of `from`.
    ///
    /// Stamps `checked_in_at`, `called_at` or `served_at` as appropriate and
    /// clears estimates once the token is no longer pending. Returns `None`
    /// when the token is not in an allowed state.
    #[instrument(skip_all, name = "clinic.repo.queue.transition", fields(to = %to))]
    pub async fn transition(
        executor: impl PgExecutor<'_>,
        token_id: Uuid,
        from: &[TokenStatus],
        to: TokenStatus,
    ) -> Result<Option<QueueTokenRow>, ClinicError> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let sql = format!(
            "WITH t AS ( \
                 UPDATE queue_tokens SET \
                     status = $2, \
                     checked_in_at = CASE WHEN $2 = 'checked_in' THEN NOW() ELSE checked_in_at END, \
                     called_at = CASE WHEN $2 = 'in_consultation' THEN NOW() ELSE called_at END, \
                     served_at = CASE WHEN $2 = 'served' THEN NOW() ELSE served_at END, \
                     estimated_wait_minutes = CASE WHEN $2 IN ('waiting', 'checked_in') \
                         THEN estimated_wait_minutes ELSE NULL END, \
                     estimated_call_at = CASE WHEN $2 IN ('waiting', 'checked_in') \
                         THEN estimated_call_at ELSE NULL END, \
                     updated_at = NOW() \
                 WHERE token_id = $1 AND status = ANY($3) \
                 RETURNING * \
             ) {TOKEN_SELECT} FROM t JOIN users u ON u.user_id = t.patient_id"
        );
        Ok(timed(
            "transition_queue_token",
            sqlx::query_as::<_, QueueTokenRow>(&sql)
                .bind(token_id)
                .bind(to)
                .bind(from)
                .fetch_optional(executor),
        )
        .await?)
    }
}
