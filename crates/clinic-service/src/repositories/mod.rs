//! Repository layer for the clinic service.
//!
//! Handler -> Service -> Repository. Repositories are unit structs with
//! associated async functions; each takes a `&PgPool` or, when it has to
//! join a caller's transaction, any `PgExecutor`.
//!
//! Every query goes through [`timed`] so it shows up in the
//! `clinic_db_query_*` metrics.

pub mod appointments;
pub mod clinics;
pub mod delay_notifications;
pub mod emergency_requests;
pub mod medicines;
pub mod otp_sessions;
pub mod prescriptions;
pub mod queue_tokens;
pub mod reminders;
pub mod users;

pub use appointments::AppointmentsRepository;
pub use clinics::ClinicsRepository;
pub use delay_notifications::DelayNotificationsRepository;
pub use emergency_requests::EmergencyRequestsRepository;
pub use medicines::MedicinesRepository;
pub use otp_sessions::OtpSessionsRepository;
pub use prescriptions::PrescriptionsRepository;
pub use queue_tokens::QueueTokensRepository;
pub use reminders::RemindersRepository;
pub use users::UsersRepository;

use crate::errors::ClinicError;
use crate::observability::metrics::record_db_query;
use std::future::Future;
use std::time::Instant;

/// Run a query and record its duration and outcome.
pub(crate) async fn timed<T, F>(operation: &'static str, query: F) -> Result<T, sqlx::Error>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    let start = Instant::now();
    let result = query.await;
    let status = if result.is_ok() { "success" } else { "error" };
    record_db_query(operation, status, start.elapsed());
    result
}

/// Map unique-constraint violations to a 409 with `message`.
pub(crate) fn conflict_on_unique(message: &'static str) -> impl FnOnce(sqlx::Error) -> ClinicError {
    move |err| match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            ClinicError::Conflict(message.to_string())
        }
        _ => ClinicError::from(err),
    }
}
