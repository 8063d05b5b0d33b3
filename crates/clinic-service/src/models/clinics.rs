//! Clinic (tenant) models.

use super::{normalize_email, normalize_phone, required_text, validate_password, ClinicStatus};
use crate::errors::ClinicError;
use crate::services::geofence;
use chrono::{DateTime, NaiveTime, Utc};
use common::secret::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Database row for a clinic.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ClinicRow {
    pub clinic_id: Uuid,
    pub name: String,
    pub address: String,
    pub phone: String,
    pub email: String,
    pub latitude: f64,
    pub longitude: f64,
    pub opening_time: NaiveTime,
    pub closing_time: NaiveTime,
    pub avg_consultation_minutes: i32,
    pub status: ClinicStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClinicRow {
    /// Whether `at` falls inside opening hours (UTC wall clock).
    pub fn is_open_at(&self, at: DateTime<Utc>) -> bool {
        let time = at.time();
        time >= self.opening_time && time < self.closing_time
    }
}

/// Public clinic registration: the clinic plus its first admin.
#[derive(Debug, Deserialize)]
pub struct RegisterClinicRequest {
    pub name: String,
    pub address: String,
    pub phone: String,
    pub email: String,
    pub latitude: f64,
    pub longitude: f64,
    pub opening_time: NaiveTime,
    pub closing_time: NaiveTime,
    #[serde(default)]
    pub avg_consultation_minutes: Option<i32>,
    pub admin_name: String,
    pub admin_email: String,
    pub admin_password: SecretString,
}

/// Normalized clinic fields ready for insert.
#[derive(Debug, Clone)]
pub struct NewClinic {
    pub name: String,
    pub address: String,
    pub phone: String,
    pub email: String,
    pub latitude: f64,
    pub longitude: f64,
    pub opening_time: NaiveTime,
    pub closing_time: NaiveTime,
    pub avg_consultation_minutes: i32,
}

/// Normalized admin fields ready for insert.
#[derive(Debug)]
pub struct NewClinicAdmin {
    pub full_name: String,
    pub email: String,
    pub password: SecretString,
}

fn validate_hours(opening: NaiveTime, closing: NaiveTime) -> Result<(), ClinicError> {
    if opening >= closing {
        return Err(ClinicError::BadRequest(
            "opening_time must be before closing_time".to_string(),
        ));
    }
    Ok(())
}

fn validate_consultation_minutes(minutes: i32) -> Result<(), ClinicError> {
    if !(1..=120).contains(&minutes) {
        return Err(ClinicError::BadRequest(
            "avg_consultation_minutes must be between 1 and 120".to_string(),
        ));
    }
    Ok(())
}

impl RegisterClinicRequest {
    /// Validate and split into clinic and admin parts.
    pub fn validate(
        self,
        default_consultation_minutes: i32,
    ) -> Result<(NewClinic, NewClinicAdmin), ClinicError> {
        geofence::validate_coordinates(self.latitude, self.longitude)?;
        validate_hours(self.opening_time, self.closing_time)?;

        let avg_consultation_minutes = self
            .avg_consultation_minutes
            .unwrap_or(default_consultation_minutes);
        validate_consultation_minutes(avg_consultation_minutes)?;
        validate_password(self.admin_password.expose_secret())?;

        let clinic = NewClinic {
            name: required_text("name", &self.name, 200)?,
            address: required_text("address", &self.address, 500)?,
            phone: normalize_phone(&self.phone)?,
            email: normalize_email(&self.email)?,
            latitude: self.latitude,
            longitude: self.longitude,
            opening_time: self.opening_time,
            closing_time: self.closing_time,
            avg_consultation_minutes,
        };

        let admin = NewClinicAdmin {
            full_name: required_text("admin_name", &self.admin_name, 200)?,
            email: normalize_email(&self.admin_email)?,
            password: self.admin_password,
        };

        Ok((clinic, admin))
    }
}

/// Partial update by a clinic admin.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateClinicRequest {
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub opening_time: Option<NaiveTime>,
    pub closing_time: Option<NaiveTime>,
    pub avg_consultation_minutes: Option<i32>,
}

impl UpdateClinicRequest {
    /// Merge onto the current row, validating the result as a whole.
    pub fn apply_to(&self, current: &ClinicRow) -> Result<NewClinic, ClinicError> {
        let name = match &self.name {
            Some(v) => required_text("name", v, 200)?,
            None => current.name.clone(),
        };
        let address = match &self.address {
            Some(v) => required_text("address", v, 500)?,
            None => current.address.clone(),
        };
        let phone = match &self.phone {
            Some(v) => normalize_phone(v)?,
            None => current.phone.clone(),
        };
        let email = match &self.email {
            Some(v) => normalize_email(v)?,
            None => current.email.clone(),
        };

        let latitude = self.latitude.unwrap_or(current.latitude);
        let longitude = self.longitude.unwrap_or(current.longitude);
        geofence::validate_coordinates(latitude, longitude)?;

        let opening_time = self.opening_time.unwrap_or(current.opening_time);
        let closing_time = self.closing_time.unwrap_or(current.closing_time);
        validate_hours(opening_time, closing_time)?;

        let avg_consultation_minutes = self
            .avg_consultation_minutes
            .unwrap_or(current.avg_consultation_minutes);
        validate_consultation_minutes(avg_consultation_minutes)?;

        Ok(NewClinic {
            name,
            address,
            phone,
            email,
            latitude,
            longitude,
            opening_time,
            closing_time,
            avg_consultation_minutes,
        })
    }
}

/// Registration result. The clinic stays pending until a platform operator
/// approves it.
#[derive(Debug, Serialize)]
pub struct ClinicRegistrationResponse {
    pub clinic: ClinicRow,
    pub admin_user_id: Uuid,
}
