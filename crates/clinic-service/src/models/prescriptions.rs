//! Prescription models.

use super::{optional_text, required_text};
use crate::errors::ClinicError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum line items on one prescription.
pub const MAX_PRESCRIPTION_ITEMS: usize = 20;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PrescriptionRow {
    pub prescription_id: Uuid,
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PrescriptionItemRow {
    pub item_id: Uuid,
    pub prescription_id: Uuid,
    pub position: i32,
    pub medicine_id: Uuid,
    pub medicine_name: String,
    pub dosage: String,
    pub frequency_per_day: i32,
    pub duration_days: i32,
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrescriptionItemInput {
    pub medicine_id: Uuid,
    pub dosage: String,
    pub frequency_per_day: i32,
    pub duration_days: i32,
    #[serde(default)]
    pub instructions: Option<String>,
}

/// Validated line item.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPrescriptionItem {
    pub medicine_id: Uuid,
    pub dosage: String,
    pub frequency_per_day: i32,
    pub duration_days: i32,
    pub instructions: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePrescriptionRequest {
    pub patient_id: Uuid,
    #[serde(default)]
    pub appointment_id: Option<Uuid>,
    #[serde(default)]
    pub notes: Option<String>,
    pub items: Vec<PrescriptionItemInput>,
}

impl CreatePrescriptionRequest {
    /// Returns normalized notes and items.
    pub fn validate(&self) -> Result<(Option<String>, Vec<NewPrescriptionItem>), ClinicError> {
        if self.items.is_empty() || self.items.len() > MAX_PRESCRIPTION_ITEMS {
            return Err(ClinicError::BadRequest(format!(
                "a prescription needs between 1 and {MAX_PRESCRIPTION_ITEMS} items"
            )));
        }

        let notes = optional_text("notes", self.notes.as_deref(), 2000)?;

        let items = self
            .items
            .iter()
            .map(|item| {
                if !(1..=6).contains(&item.frequency_per_day) {
                    return Err(ClinicError::BadRequest(
                        "frequency_per_day must be between 1 and 6".to_string(),
                    ));
                }
                if !(1..=365).contains(&item.duration_days) {
                    return Err(ClinicError::BadRequest(
                        "duration_days must be between 1 and 365".to_string(),
                    ));
                }
                Ok(NewPrescriptionItem {
                    medicine_id: item.medicine_id,
                    dosage: required_text("dosage", &item.dosage, 200)?,
                    frequency_per_day: item.frequency_per_day,
                    duration_days: item.duration_days,
                    instructions: optional_text(
                        "instructions",
                        item.instructions.as_deref(),
                        500,
                    )?,
                })
            })
            .collect::<Result<Vec<_>, ClinicError>>()?;

        Ok((notes, items))
    }
}

#[derive(Debug, Serialize)]
pub struct PrescriptionResponse {
    #[serde(flatten)]
    pub prescription: PrescriptionRow,
    pub items: Vec<PrescriptionItemRow>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PrescriptionListQuery {
    pub patient_id: Option<Uuid>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn item(freq: i32, days: i32) -> PrescriptionItemInput {
        PrescriptionItemInput {
            medicine_id: Uuid::new_v4(),
            dosage: "1 tablet".to_string(),
            frequency_per_day: freq,
            duration_days: days,
            instructions: Some("after meals".to_string()),
        }
    }

    fn request(items: Vec<PrescriptionItemInput>) -> CreatePrescriptionRequest {
        CreatePrescriptionRequest {
            patient_id: Uuid::new_v4(),
            appointment_id: None,
            notes: None,
            items,
        }
    }

    #[test]
    fn test_item_count_bounds() {
        assert!(request(vec![]).validate().is_err());
        assert!(request(vec![item(1, 1); 21]).validate().is_err());
        let (_, items) = request(vec![item(3, 7); 20]).validate().unwrap();
        assert_eq!(items.len(), 20);
    }

    #[test]
    fn test_item_field_bounds() {
        assert!(request(vec![item(0, 5)]).validate().is_err());
        assert!(request(vec![item(7, 5)]).validate().is_err());
        assert!(request(vec![item(2, 0)]).validate().is_err());
        assert!(request(vec![item(2, 366)]).validate().is_err());
        assert!(request(vec![item(6, 365)]).validate().is_ok());
    }
}
