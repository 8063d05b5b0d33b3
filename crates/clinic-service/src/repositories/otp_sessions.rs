//! One-time passcode sessions.

use super::timed;
use crate::errors::ClinicError;
use crate::models::{NotificationChannel, OtpSessionRow};
use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool};
use tracing::instrument;
use uuid::Uuid;

const SESSION_COLUMNS: &str = "session_id, clinic_id, identifier, channel, code_hash, attempts, \
                               expires_at, consumed_at, created_at";

pub struct OtpSessionsRepository;

impl OtpSessionsRepository {
    /// Sessions created for an identifier since `since`.
    #[instrument(skip_all, name = "clinic.repo.otp.count_recent")]
    pub async fn count_since(
        pool: &PgPool,
        clinic_id: Uuid,
        identifier: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, ClinicError> {
        Ok(timed(
            "count_recent_otp",
            sqlx::query_scalar::<_, i64>(
                r#"
                SELECT COUNT(*) FROM otp_sessions
                WHERE clinic_id = $1 AND identifier = $2 AND created_at >= $3
                "#,
            )
            .bind(clinic_id)
            .bind(identifier)
            .bind(since)
            .fetch_one(pool),
        )
        .await?)
    }

    /// Close every open session of an identifier.
    #[instrument(skip_all, name = "clinic.repo.otp.invalidate")]
    pub async fn invalidate_open(
        executor: impl PgExecutor<'_>,
        clinic_id: Uuid,
        identifier: &str,
    ) -> Result<u64, ClinicError> {
        let result = timed(
            "invalidate_otp",
            sqlx::query(
                r#"
                UPDATE otp_sessions SET consumed_at = NOW()
                WHERE clinic_id = $1 AND identifier = $2 AND consumed_at IS NULL
                "#,
            )
            .bind(clinic_id)
            .bind(identifier)
            .execute(executor),
        )
        .await?;
        Ok(result.rows_affected())
    }

    #[instrument(skip_all, name = "clinic.repo.otp.create")]
    pub async fn create(
        executor: impl PgExecutor<'_>,
        clinic_id: Uuid,
        identifier: &str,
        channel: NotificationChannel,
        code_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<OtpSessionRow, ClinicError> {
        let sql = format!(
            "INSERT INTO otp_sessions (clinic_id, identifier, channel, code_hash, expires_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {SESSION_COLUMNS}"
        );
        Ok(timed(
            "create_otp",
            sqlx::query_as::<_, OtpSessionRow>(&sql)
                .bind(clinic_id)
                .bind(identifier)
                .bind(channel)
                .bind(code_hash)
                .bind(expires_at)
                .fetch_one(executor),
        )
        .await?)
    }

    /// Newest unconsumed session for an identifier and channel.
    #[instrument(skip_all, name = "clinic.repo.otp.find_open")]
    pub async fn find_open(
        pool: &PgPool,
        clinic_id: Uuid,
        identifier: &str,
        channel: NotificationChannel,
    ) -> Result<Option<OtpSessionRow>, ClinicError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM otp_sessions \
             WHERE clinic_id = $1 AND identifier = $2 AND channel = $3 \
               AND consumed_at IS NULL \
             ORDER BY created_at DESC LIMIT 1"
        );
        Ok(timed(
            "find_open_otp",
            sqlx::query_as::<_, OtpSessionRow>(&sql)
                .bind(clinic_id)
                .bind(identifier)
                .bind(channel)
                .fetch_optional(pool),
        )
        .await?)
    }

    /// Record a failed attempt and return the new count.
    #[instrument(skip_all, name = "clinic.repo.otp.fail")]
    pub async fn record_failed_attempt(
        pool: &PgPool,
        session_id: Uuid,
    ) -> Result<i32, ClinicError> {
        Ok(timed(
            "fail_otp",
            sqlx::query_scalar::<_, i32>(
                r#"
                UPDATE otp_sessions SET attempts = attempts + 1
                WHERE session_id = $1
                RETURNING attempts
                "#,
            )
            .bind(session_id)
            .fetch_one(pool),
        )
        .await?)
    }

    /// Mark a session used. Returns false if it was already consumed.
    #[instrument(skip_all, name = "clinic.repo.otp.consume")]
    pub async fn consume(pool: &PgPool, session_id: Uuid) -> Result<bool, ClinicError> {
        let result = timed(
            "consume_otp",
            sqlx::query(
                r#"
                UPDATE otp_sessions SET consumed_at = NOW()
                WHERE session_id = $1 AND consumed_at IS NULL
                "#,
            )
            .bind(session_id)
            .execute(pool),
        )
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Delete sessions that expired before `cutoff`.
    #[instrument(skip_all, name = "clinic.repo.otp.purge")]
    pub async fn delete_expired_before(
        pool: &PgPool,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, ClinicError> {
        let result = timed(
            "purge_otp",
            sqlx::query("DELETE FROM otp_sessions WHERE expires_at < $1")
                .bind(cutoff)
                .execute(pool),
        )
        .await?;
        Ok(result.rows_affected())
    }
}
