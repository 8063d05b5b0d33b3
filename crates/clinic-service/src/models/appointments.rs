//! Appointment models.

use super::{optional_text, AppointmentStatus, QueueTokenRow};
use crate::errors::ClinicError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Database row for an appointment.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AppointmentRow {
    pub appointment_id: Uuid,
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub created_by: Uuid,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Book an appointment. `patient_id` is only honored for staff bookings.
#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub doctor_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub patient_id: Option<Uuid>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl CreateAppointmentRequest {
    /// Checks that only depend on the request itself.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<Option<String>, ClinicError> {
        if self.scheduled_at <= now {
            return Err(ClinicError::BadRequest(
                "scheduled_at must be in the future".to_string(),
            ));
        }
        optional_text("reason", self.reason.as_deref(), 500)
    }
}

/// Appointment list filters.
#[derive(Debug, Default, Deserialize)]
pub struct AppointmentListQuery {
    pub date: Option<NaiveDate>,
    pub doctor_id: Option<Uuid>,
}

/// A booking and the queue token it produced.
#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub appointment: AppointmentRow,
    pub token: QueueTokenRow,
}
