//! Emergency requests.

use super::timed;
use crate::errors::ClinicError;
use crate::models::{EmergencyRequestRow, EmergencySeverity, EmergencyStatus};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

const REQUEST_COLUMNS: &str = "request_id, clinic_id, patient_id, description, severity, \
                               latitude, longitude, status, handled_by, acknowledged_at, \
                               resolved_at, created_at, updated_at";

pub struct EmergencyRequestsRepository;

impl EmergencyRequestsRepository {
    #[instrument(skip_all, name = "clinic.repo.emergency.create")]
    pub async fn create(
        pool: &PgPool,
        clinic_id: Uuid,
        patient_id: Uuid,
        description: &str,
        severity: EmergencySeverity,
        location: Option<(f64, f64)>,
    ) -> Result<EmergencyRequestRow, ClinicError> {
        let sql = format!(
            "INSERT INTO emergency_requests \
                 (clinic_id, patient_id, description, severity, latitude, longitude) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {REQUEST_COLUMNS}"
        );
        Ok(timed(
            "create_emergency",
            sqlx::query_as::<_, EmergencyRequestRow>(&sql)
                .bind(clinic_id)
                .bind(patient_id)
                .bind(description)
                .bind(severity)
                .bind(location.map(|(lat, _)| lat))
                .bind(location.map(|(_, lon)| lon))
                .fetch_one(pool),
        )
        .await?)
    }

    #[instrument(skip_all, name = "clinic.repo.emergency.find")]
    pub async fn find(
        pool: &PgPool,
        clinic_id: Uuid,
        request_id: Uuid,
    ) -> Result<Option<EmergencyRequestRow>, ClinicError> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM emergency_requests \
             WHERE request_id = $1 AND clinic_id = $2"
        );
        Ok(timed(
            "find_emergency",
            sqlx::query_as::<_, EmergencyRequestRow>(&sql)
                .bind(request_id)
                .bind(clinic_id)
                .fetch_optional(pool),
        )
        .await?)
    }

    /// Newest first.
    #[instrument(skip_all, name = "clinic.repo.emergency.list")]
    pub async fn list(
        pool: &PgPool,
        clinic_id: Uuid,
        status: Option<EmergencyStatus>,
        patient_id: Option<Uuid>,
    ) -> Result<Vec<EmergencyRequestRow>, ClinicError> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM emergency_requests \
             WHERE clinic_id = $1 \
               AND ($2::TEXT IS NULL OR status = $2) \
               AND ($3::UUID IS NULL OR patient_id = $3) \
             ORDER BY created_at DESC"
        );
        Ok(timed(
            "list_emergencies",
            sqlx::query_as::<_, EmergencyRequestRow>(&sql)
                .bind(clinic_id)
                .bind(status.map(|s| s.as_str()))
                .bind(patient_id)
                .fetch_all(pool),
        )
        .await?)
    }

    /// Move a request from `from` to `to`, stamping the handler.
    ///
    /// Returns `None` if the request changed status in the meantime.
    #[instrument(skip_all, name = "clinic.repo.emergency.transition")]
    pub async fn transition(
        pool: &PgPool,
        clinic_id: Uuid,
        request_id: Uuid,
        from: EmergencyStatus,
        to: EmergencyStatus,
        handled_by: Uuid,
    ) -> Result<Option<EmergencyRequestRow>, ClinicError> {
        let sql = format!(
            "UPDATE emergency_requests SET \
                 status = $4, \
                 handled_by = $5, \
                 acknowledged_at = CASE WHEN $4 = 'acknowledged' THEN NOW() \
                     ELSE acknowledged_at END, \
                 resolved_at = CASE WHEN $4 = 'resolved' THEN NOW() ELSE resolved_at END, \
                 updated_at = NOW() \
             WHERE request_id = $1 AND clinic_id = $2 AND status = $3 \
             RETURNING {REQUEST_COLUMNS}"
        );
        Ok(timed(
            "transition_emergency",
            sqlx::query_as::<_, EmergencyRequestRow>(&sql)
                .bind(request_id)
                .bind(clinic_id)
                .bind(from)
                .bind(to)
                .bind(handled_by)
                .fetch_optional(pool),
        )
        .await?)
    }
}
