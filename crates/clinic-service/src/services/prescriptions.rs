//! Prescription writing.

use crate::errors::ClinicError;
use crate::models::{AccountStatus, NewPrescriptionItem, PrescriptionResponse};
use crate::repositories::prescriptions::{NewItem, NewPrescription};
use crate::repositories::{
    AppointmentsRepository, MedicinesRepository, PrescriptionsRepository, UsersRepository,
};
use common::types::Role;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{info, instrument};
use uuid::Uuid;

/// Who the prescription is for and what it is attached to.
#[derive(Debug, Clone, Copy)]
pub struct PrescriptionHeader<'a> {
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub notes: Option<&'a str>,
}

/// Write a prescription with its items in one transaction.
///
/// Medicine names are copied onto the items so later renames or removals
/// from the inventory do not change what was prescribed.
#[instrument(skip_all, name = "clinic.prescriptions.create", fields(items = items.len()))]
pub async fn create(
    pool: &PgPool,
    header: PrescriptionHeader<'_>,
    items: &[NewPrescriptionItem],
) -> Result<PrescriptionResponse, ClinicError> {
    let mut tx = pool.begin().await?;

    let patient =
        UsersRepository::find_in_clinic(&mut *tx, header.clinic_id, header.patient_id, Some(Role::Patient))
            .await?
            .filter(|p| p.status == AccountStatus::Approved)
            .ok_or_else(|| ClinicError::NotFound("Patient not found".to_string()))?;

    if let Some(appointment_id) = header.appointment_id {
        let belongs = AppointmentsRepository::find(&mut *tx, header.clinic_id, appointment_id)
            .await?
            .is_some_and(|a| a.patient_id == patient.user_id);
        if !belongs {
            return Err(ClinicError::NotFound("Appointment not found".to_string()));
        }
    }

    let ids: Vec<Uuid> = items.iter().map(|i| i.medicine_id).collect();
    let names: HashMap<Uuid, String> =
        MedicinesRepository::find_many(&mut *tx, header.clinic_id, &ids)
            .await?
            .into_iter()
            .map(|m| (m.medicine_id, m.name))
            .collect();

    let rows = items
        .iter()
        .map(|item| {
            let name = names.get(&item.medicine_id).ok_or_else(|| {
                ClinicError::NotFound(format!("Medicine {} not found", item.medicine_id))
            })?;
            Ok(NewItem {
                medicine_id: item.medicine_id,
                medicine_name: name,
                dosage: &item.dosage,
                frequency_per_day: item.frequency_per_day,
                duration_days: item.duration_days,
                instructions: item.instructions.as_deref(),
            })
        })
        .collect::<Result<Vec<_>, ClinicError>>()?;

    let created = PrescriptionsRepository::create(
        &mut tx,
        &NewPrescription {
            clinic_id: header.clinic_id,
            doctor_id: header.doctor_id,
            patient_id: patient.user_id,
            appointment_id: header.appointment_id,
            notes: header.notes,
        },
        &rows,
    )
    .await?;
    tx.commit().await?;

    info!(
        target: "clinic.prescriptions",
        prescription_id = %created.prescription.prescription_id,
        "Prescription written"
    );
    Ok(created)
}
