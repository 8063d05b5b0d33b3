//! Prescriptions and their line items.

use super::timed;
use crate::errors::ClinicError;
use crate::models::{PrescriptionItemRow, PrescriptionResponse, PrescriptionRow};
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use tracing::instrument;
use uuid::Uuid;

const PRESCRIPTION_COLUMNS: &str =
    "prescription_id, clinic_id, doctor_id, patient_id, appointment_id, notes, created_at";

const ITEM_COLUMNS: &str = "item_id, prescription_id, position, medicine_id, medicine_name, \
                            dosage, frequency_per_day, duration_days, instructions";

/// Prescription header for insert.
#[derive(Debug)]
pub struct NewPrescription<'a> {
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub notes: Option<&'a str>,
}

/// Line item for insert; the medicine name is copied at prescribing time.
#[derive(Debug)]
pub struct NewItem<'a> {
    pub medicine_id: Uuid,
    pub medicine_name: &'a str,
    pub dosage: &'a str,
    pub frequency_per_day: i32,
    pub duration_days: i32,
    pub instructions: Option<&'a str>,
}

pub struct PrescriptionsRepository;

impl PrescriptionsRepository {
    /// Insert header and items on the caller's transaction.
    #[instrument(skip_all, name = "clinic.repo.prescriptions.create")]
    pub async fn create(
        conn: &mut PgConnection,
        prescription: &NewPrescription<'_>,
        items: &[NewItem<'_>],
    ) -> Result<PrescriptionResponse, ClinicError> {
        let sql = format!(
            "INSERT INTO prescriptions (clinic_id, doctor_id, patient_id, appointment_id, notes) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {PRESCRIPTION_COLUMNS}"
        );
        let header = timed(
            "create_prescription",
            sqlx::query_as::<_, PrescriptionRow>(&sql)
                .bind(prescription.clinic_id)
                .bind(prescription.doctor_id)
                .bind(prescription.patient_id)
                .bind(prescription.appointment_id)
                .bind(prescription.notes)
                .fetch_one(&mut *conn),
        )
        .await?;

        let item_sql = format!(
            "INSERT INTO prescription_items (prescription_id, position, medicine_id, \
                 medicine_name, dosage, frequency_per_day, duration_days, instructions) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {ITEM_COLUMNS}"
        );

        let mut rows = Vec::with_capacity(items.len());
        for (position, item) in (1..).zip(items) {
            let row = timed(
                "create_prescription_item",
                sqlx::query_as::<_, PrescriptionItemRow>(&item_sql)
                    .bind(header.prescription_id)
                    .bind(position)
                    .bind(item.medicine_id)
                    .bind(item.medicine_name)
                    .bind(item.dosage)
                    .bind(item.frequency_per_day)
                    .bind(item.duration_days)
                    .bind(item.instructions)
                    .fetch_one(&mut *conn),
            )
            .await?;
            rows.push(row);
        }

        Ok(PrescriptionResponse {
            prescription: header,
            items: rows,
        })
    }

    #[instrument(skip_all, name = "clinic.repo.prescriptions.find")]
    pub async fn find(
        pool: &PgPool,
        clinic_id: Uuid,
        prescription_id: Uuid,
    ) -> Result<Option<PrescriptionResponse>, ClinicError> {
        let sql = format!(
            "SELECT {PRESCRIPTION_COLUMNS} FROM prescriptions \
             WHERE prescription_id = $1 AND clinic_id = $2"
        );
        let header = timed(
            "find_prescription",
            sqlx::query_as::<_, PrescriptionRow>(&sql)
                .bind(prescription_id)
                .bind(clinic_id)
                .fetch_optional(pool),
        )
        .await?;

        match header {
            Some(header) => Ok(Self::attach_items(pool, vec![header]).await?.pop()),
            None => Ok(None),
        }
    }

    /// Prescriptions of a clinic, newest first, optionally for one patient.
    #[instrument(skip_all, name = "clinic.repo.prescriptions.list")]
    pub async fn list(
        pool: &PgPool,
        clinic_id: Uuid,
        patient_id: Option<Uuid>,
    ) -> Result<Vec<PrescriptionResponse>, ClinicError> {
        let sql = format!(
            "SELECT {PRESCRIPTION_COLUMNS} FROM prescriptions \
             WHERE clinic_id = $1 AND ($2::UUID IS NULL OR patient_id = $2) \
             ORDER BY created_at DESC"
        );
        let headers = timed(
            "list_prescriptions",
            sqlx::query_as::<_, PrescriptionRow>(&sql)
                .bind(clinic_id)
                .bind(patient_id)
                .fetch_all(pool),
        )
        .await?;

        Self::attach_items(pool, headers).await
    }

    async fn attach_items(
        pool: &PgPool,
        headers: Vec<PrescriptionRow>,
    ) -> Result<Vec<PrescriptionResponse>, ClinicError> {
        if headers.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = headers.iter().map(|h| h.prescription_id).collect();
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM prescription_items \
             WHERE prescription_id = ANY($1) ORDER BY prescription_id, position"
        );
        let items = timed(
            "list_prescription_items",
            sqlx::query_as::<_, PrescriptionItemRow>(&sql)
                .bind(&ids)
                .fetch_all(pool),
        )
        .await?;

        let mut by_prescription: HashMap<Uuid, Vec<PrescriptionItemRow>> = HashMap::new();
        for item in items {
            by_prescription
                .entry(item.prescription_id)
                .or_default()
                .push(item);
        }

        Ok(headers
            .into_iter()
            .map(|prescription| PrescriptionResponse {
                items: by_prescription
                    .remove(&prescription.prescription_id)
                    .unwrap_or_default(),
                prescription,
            })
            .collect())
    }
}
