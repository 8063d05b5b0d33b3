//! Clinic (tenant) records.

use super::timed;
use crate::errors::ClinicError;
use crate::models::{ClinicRow, ClinicStatus, NewClinic};
use sqlx::{PgExecutor, PgPool};
use tracing::instrument;
use uuid::Uuid;

const CLINIC_COLUMNS: &str = "clinic_id, name, address, phone, email, latitude, longitude, \
                              opening_time, closing_time, avg_consultation_minutes, status, \
                              created_at, updated_at";

pub struct ClinicsRepository;

impl ClinicsRepository {
    /// Insert a new clinic in `pending` state.
    #[instrument(skip_all, name = "clinic.repo.clinics.create")]
    pub async fn create(
        executor: impl PgExecutor<'_>,
        clinic: &NewClinic,
    ) -> Result<ClinicRow, ClinicError> {
        let sql = format!(
            "INSERT INTO clinics (name, address, phone, email, latitude, longitude, \
                                  opening_time, closing_time, avg_consultation_minutes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {CLINIC_COLUMNS}"
        );

        Ok(timed(
            "create_clinic",
            sqlx::query_as::<_, ClinicRow>(&sql)
                .bind(&clinic.name)
                .bind(&clinic.address)
                .bind(&clinic.phone)
                .bind(&clinic.email)
                .bind(clinic.latitude)
                .bind(clinic.longitude)
                .bind(clinic.opening_time)
                .bind(clinic.closing_time)
                .bind(clinic.avg_consultation_minutes)
                .fetch_one(executor),
        )
        .await?)
    }

    #[instrument(skip_all, name = "clinic.repo.clinics.find")]
    pub async fn find_by_id(
        executor: impl PgExecutor<'_>,
        clinic_id: Uuid,
    ) -> Result<Option<ClinicRow>, ClinicError> {
        let sql = format!("SELECT {CLINIC_COLUMNS} FROM clinics WHERE clinic_id = $1");
        Ok(timed(
            "find_clinic",
            sqlx::query_as::<_, ClinicRow>(&sql)
                .bind(clinic_id)
                .fetch_optional(executor),
        )
        .await?)
    }

    /// Active clinic or `NotFound`.
    pub async fn get_active(pool: &PgPool, clinic_id: Uuid) -> Result<ClinicRow, ClinicError> {
        match Self::find_by_id(pool, clinic_id).await? {
            Some(clinic) if clinic.status == ClinicStatus::Active => Ok(clinic),
            _ => Err(ClinicError::NotFound("Clinic not found".to_string())),
        }
    }

    #[instrument(skip_all, name = "clinic.repo.clinics.list_active")]
    pub async fn list_active(pool: &PgPool) -> Result<Vec<ClinicRow>, ClinicError> {
        let sql = format!(
            "SELECT {CLINIC_COLUMNS} FROM clinics WHERE status = 'active' ORDER BY name"
        );
        Ok(timed(
            "list_active_clinics",
            sqlx::query_as::<_, ClinicRow>(&sql).fetch_all(pool),
        )
        .await?)
    }

    #[instrument(skip_all, name = "clinic.repo.clinics.set_status")]
    pub async fn set_status(
        executor: impl PgExecutor<'_>,
        clinic_id: Uuid,
        status: ClinicStatus,
    ) -> Result<Option<ClinicRow>, ClinicError> {
        let sql = format!(
            "UPDATE clinics SET status = $2, updated_at = NOW() \
             WHERE clinic_id = $1 RETURNING {CLINIC_COLUMNS}"
        );
        Ok(timed(
            "set_clinic_status",
            sqlx::query_as::<_, ClinicRow>(&sql)
                .bind(clinic_id)
                .bind(status)
                .fetch_optional(executor),
        )
        .await?)
    }

    #[instrument(skip_all, name = "clinic.repo.clinics.update")]
    pub async fn update(
        pool: &PgPool,
        clinic_id: Uuid,
        clinic: &NewClinic,
    ) -> Result<Option<ClinicRow>, ClinicError> {
        let sql = format!(
            "UPDATE clinics SET name = $2, address = $3, phone = $4, email = $5, \
                 latitude = $6, longitude = $7, opening_time = $8, closing_time = $9, \
                 avg_consultation_minutes = $10, updated_at = NOW() \
             WHERE clinic_id = $1 RETURNING {CLINIC_COLUMNS}"
        );
        Ok(timed(
            "update_clinic",
            sqlx::query_as::<_, ClinicRow>(&sql)
                .bind(clinic_id)
                .bind(&clinic.name)
                .bind(&clinic.address)
                .bind(&clinic.phone)
                .bind(&clinic.email)
                .bind(clinic.latitude)
                .bind(clinic.longitude)
                .bind(clinic.opening_time)
                .bind(clinic.closing_time)
                .bind(clinic.avg_consultation_minutes)
                .fetch_optional(pool),
        )
        .await?)
    }
}
