//! Emergency request models.

use super::{required_text, EmergencySeverity, EmergencyStatus};
use crate::errors::ClinicError;
use crate::services::geofence;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EmergencyRequestRow {
    pub request_id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub description: String,
    pub severity: EmergencySeverity,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: EmergencyStatus,
    pub handled_by: Option<Uuid>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateEmergencyRequest {
    pub description: String,
    pub severity: EmergencySeverity,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl CreateEmergencyRequest {
    /// Returns the trimmed description.
    pub fn validate(&self) -> Result<String, ClinicError> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => geofence::validate_coordinates(lat, lon)?,
            (None, None) => {}
            _ => {
                return Err(ClinicError::BadRequest(
                    "latitude and longitude must be given together".to_string(),
                ))
            }
        }
        required_text("description", &self.description, 1000)
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateEmergencyRequest {
    pub status: EmergencyStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct EmergencyListQuery {
    pub status: Option<EmergencyStatus>,
}
