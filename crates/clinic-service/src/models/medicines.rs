//! Medicine inventory models.

use super::{optional_text, required_text};
use crate::errors::ClinicError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Database row for a medicine.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MedicineRow {
    pub medicine_id: Uuid,
    pub clinic_id: Uuid,
    pub name: String,
    pub generic_name: Option<String>,
    pub form: String,
    pub strength: String,
    pub unit: String,
    pub stock_quantity: i32,
    pub reorder_level: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MedicineRow {
    pub fn is_low_stock(&self) -> bool {
        self.stock_quantity <= self.reorder_level
    }
}

/// Normalized medicine fields.
#[derive(Debug, Clone, PartialEq)]
pub struct MedicineFields {
    pub name: String,
    pub generic_name: Option<String>,
    pub form: String,
    pub strength: String,
    pub unit: String,
    pub stock_quantity: i32,
    pub reorder_level: i32,
}

fn non_negative(field: &str, value: i32) -> Result<i32, ClinicError> {
    if value < 0 {
        return Err(ClinicError::BadRequest(format!(
            "{field} must not be negative"
        )));
    }
    Ok(value)
}

#[derive(Debug, Deserialize)]
pub struct CreateMedicineRequest {
    pub name: String,
    #[serde(default)]
    pub generic_name: Option<String>,
    pub form: String,
    pub strength: String,
    pub unit: String,
    #[serde(default)]
    pub stock_quantity: i32,
    #[serde(default)]
    pub reorder_level: i32,
}

impl CreateMedicineRequest {
    pub fn validate(&self) -> Result<MedicineFields, ClinicError> {
        Ok(MedicineFields {
            name: required_text("name", &self.name, 200)?,
            generic_name: optional_text("generic_name", self.generic_name.as_deref(), 200)?,
            form: required_text("form", &self.form, 50)?,
            strength: required_text("strength", &self.strength, 50)?,
            unit: required_text("unit", &self.unit, 30)?,
            stock_quantity: non_negative("stock_quantity", self.stock_quantity)?,
            reorder_level: non_negative("reorder_level", self.reorder_level)?,
        })
    }
}

/// Partial update. Stock changes go through the adjust endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateMedicineRequest {
    pub name: Option<String>,
    pub generic_name: Option<String>,
    pub form: Option<String>,
    pub strength: Option<String>,
    pub unit: Option<String>,
    pub reorder_level: Option<i32>,
}

impl UpdateMedicineRequest {
    pub fn apply_to(&self, current: &MedicineRow) -> Result<MedicineFields, ClinicError> {
        let pick = |field: &str, new: &Option<String>, old: &str, max: usize| match new {
            Some(v) => required_text(field, v, max),
            None => Ok(old.to_string()),
        };

        let generic_name = match &self.generic_name {
            Some(v) => optional_text("generic_name", Some(v), 200)?,
            None => current.generic_name.clone(),
        };

        Ok(MedicineFields {
            name: pick("name", &self.name, &current.name, 200)?,
            generic_name,
            form: pick("form", &self.form, &current.form, 50)?,
            strength: pick("strength", &self.strength, &current.strength, 50)?,
            unit: pick("unit", &self.unit, &current.unit, 30)?,
            stock_quantity: current.stock_quantity,
            reorder_level: non_negative(
                "reorder_level",
                self.reorder_level.unwrap_or(current.reorder_level),
            )?,
        })
    }
}

/// Largest stock movement accepted in one request, either direction.
pub const MAX_STOCK_DELTA: i32 = 1_000_000;

/// Stock movement. Positive for deliveries, negative for dispensing.
#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    pub delta: i32,
}

impl AdjustStockRequest {
    pub fn validate(&self) -> Result<i32, ClinicError> {
        if self.delta == 0 {
            return Err(ClinicError::BadRequest("delta must not be zero".to_string()));
        }
        if self.delta.unsigned_abs() > MAX_STOCK_DELTA.unsigned_abs() {
            return Err(ClinicError::BadRequest(format!(
                "delta must be between -{MAX_STOCK_DELTA} and {MAX_STOCK_DELTA}"
            )));
        }
        Ok(self.delta)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MedicineListQuery {
    pub q: Option<String>,
    #[serde(default)]
    pub low_stock: bool,
}
