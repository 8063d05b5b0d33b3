//! OTP session cleanup background task.
//!
//! Hourly, deletes OTP sessions that expired more than a day ago. Recent
//! sessions are kept so the per-identifier request limit still sees them.
//!
//! # Graceful Shutdown
//!
//! The task completes its current iteration and exits when the cancellation
//! token is triggered.

use crate::errors::ClinicError;
use crate::repositories::OtpSessionsRepository;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// Cleanup interval in seconds (1 hour).
pub const CLEANUP_INTERVAL_SECONDS: u64 = 3600;

/// Hours an expired session is retained.
pub const EXPIRED_RETENTION_HOURS: i64 = 24;

/// Start the session cleanup task.
///
/// Returns when the cancellation token is triggered.
#[instrument(skip_all, name = "clinic.task.session_cleanup")]
pub async fn start_session_cleanup(pool: PgPool, cancel_token: CancellationToken) {
    info!(
        target: "clinic.task.session_cleanup",
        interval_seconds = CLEANUP_INTERVAL_SECONDS,
        retention_hours = EXPIRED_RETENTION_HOURS,
        "Starting OTP session cleanup task"
    );

    let mut interval = tokio::time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECONDS));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = run_session_cleanup(&pool, Utc::now()).await {
                    error!(
                        target: "clinic.task.session_cleanup",
                        error = %e,
                        "Failed to purge expired OTP sessions"
                    );
                }
            }
            _ = cancel_token.cancelled() => {
                info!(
                    target: "clinic.task.session_cleanup",
                    "Session cleanup task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "clinic.task.session_cleanup", "Session cleanup task stopped");
}

/// Delete sessions that expired before `now - 24h`. Returns the count.
pub async fn run_session_cleanup(pool: &PgPool, now: DateTime<Utc>) -> Result<u64, ClinicError> {
    let cutoff = now - ChronoDuration::hours(EXPIRED_RETENTION_HOURS);
    let deleted = OtpSessionsRepository::delete_expired_before(pool, cutoff).await?;
    if deleted > 0 {
        info!(
            target: "clinic.task.session_cleanup",
            deleted_count = deleted,
            "Purged expired OTP sessions"
        );
    }
    Ok(deleted)
}
