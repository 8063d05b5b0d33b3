//! Emergency requests raised by patients.

use crate::errors::ClinicError;
use crate::models::{ClinicRow, EmergencyRequestRow, EmergencySeverity, EmergencyStatus};
use crate::repositories::{EmergencyRequestsRepository, UsersRepository};
use crate::services::notifier::{notify_best_effort, Notification, Notifier};
use sqlx::PgPool;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Record the request and alert the clinic by SMS and email.
#[instrument(skip_all, name = "clinic.emergencies.raise", fields(severity = %severity))]
pub async fn raise(
    pool: &PgPool,
    notifier: &dyn Notifier,
    clinic: &ClinicRow,
    patient_id: Uuid,
    description: &str,
    severity: EmergencySeverity,
    location: Option<(f64, f64)>,
) -> Result<EmergencyRequestRow, ClinicError> {
    let request = EmergencyRequestsRepository::create(
        pool,
        clinic.clinic_id,
        patient_id,
        description,
        severity,
        location,
    )
    .await?;

    let patient_name = UsersRepository::find_by_id(pool, patient_id)
        .await?
        .map(|p| p.full_name)
        .unwrap_or_default();
    let location_text = location
        .map(|(lat, lon)| format!(" Location: {lat:.5}, {lon:.5}."))
        .unwrap_or_default();
    let body = format!(
        "{} emergency from {}: {}.{}",
        severity.as_str().to_uppercase(),
        patient_name,
        description,
        location_text
    );

    let sms = Notification::sms(clinic.phone.clone(), body.clone());
    let email = Notification::email(clinic.email.clone(), "Emergency request", body);
    let sms_sent = notify_best_effort(notifier, "emergency", sms).await;
    let email_sent = notify_best_effort(notifier, "emergency", email).await;

    if sms_sent || email_sent {
        info!(target: "clinic.emergencies", request_id = %request.request_id, "Emergency request raised");
    } else {
        warn!(
            target: "clinic.emergencies",
            request_id = %request.request_id,
            "Emergency request raised but the clinic could not be alerted"
        );
    }
    Ok(request)
}

/// Move a request along `open -> acknowledged -> resolved`.
#[instrument(skip_all, name = "clinic.emergencies.transition", fields(request_id = %request_id, to = %next))]
pub async fn transition(
    pool: &PgPool,
    clinic_id: Uuid,
    request_id: Uuid,
    next: EmergencyStatus,
    handled_by: Uuid,
) -> Result<EmergencyRequestRow, ClinicError> {
    let current = EmergencyRequestsRepository::find(pool, clinic_id, request_id)
        .await?
        .ok_or_else(|| ClinicError::NotFound("Emergency request not found".to_string()))?;

    if !current.status.can_transition_to(next) {
        return Err(ClinicError::Conflict(format!(
            "Cannot move an emergency request from {} to {}",
            current.status, next
        )));
    }

    // Guarded on the status we read; a concurrent change loses here
    EmergencyRequestsRepository::transition(
        pool,
        clinic_id,
        request_id,
        current.status,
        next,
        handled_by,
    )
    .await?
    .ok_or_else(|| {
        ClinicError::Conflict("Emergency request was updated concurrently".to_string())
    })
}
