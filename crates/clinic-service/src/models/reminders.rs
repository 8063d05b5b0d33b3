//! Medicine reminder models.

use super::{optional_text, required_text, NotificationChannel};
use crate::errors::ClinicError;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum reminder times per day.
pub const MAX_TIMES_OF_DAY: usize = 6;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MedicineReminderRow {
    pub reminder_id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub medicine_name: String,
    pub dosage: Option<String>,
    /// "HH:MM" in UTC, sorted.
    pub times_of_day: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub channel: NotificationChannel,
    pub is_active: bool,
    pub next_fire_at: Option<DateTime<Utc>>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl MedicineReminderRow {
    /// Stored times parsed back into `NaiveTime`.
    pub fn parsed_times(&self) -> Result<Vec<NaiveTime>, ClinicError> {
        parse_times_of_day(&self.times_of_day)
    }
}

/// Parse, sort and de-duplicate "HH:MM" strings.
pub fn parse_times_of_day(raw: &[String]) -> Result<Vec<NaiveTime>, ClinicError> {
    let mut times = raw
        .iter()
        .map(|t| {
            NaiveTime::parse_from_str(t.trim(), "%H:%M").map_err(|_| {
                ClinicError::BadRequest(format!("invalid time of day '{t}', expected HH:MM"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    times.sort();
    times.dedup();
    Ok(times)
}

/// Format times for storage.
pub fn format_times_of_day(times: &[NaiveTime]) -> Vec<String> {
    times.iter().map(|t| t.format("%H:%M").to_string()).collect()
}

#[derive(Debug, Deserialize)]
pub struct CreateReminderRequest {
    /// Staff set this; patients create reminders for themselves.
    #[serde(default)]
    pub patient_id: Option<Uuid>,
    pub medicine_name: String,
    #[serde(default)]
    pub dosage: Option<String>,
    pub times_of_day: Vec<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub channel: NotificationChannel,
}

/// Validated reminder fields.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReminder {
    pub medicine_name: String,
    pub dosage: Option<String>,
    pub times_of_day: Vec<NaiveTime>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub channel: NotificationChannel,
}

impl CreateReminderRequest {
    pub fn validate(&self, today: NaiveDate) -> Result<NewReminder, ClinicError> {
        let times_of_day = parse_times_of_day(&self.times_of_day)?;
        if times_of_day.is_empty() || times_of_day.len() > MAX_TIMES_OF_DAY {
            return Err(ClinicError::BadRequest(format!(
                "times_of_day needs between 1 and {MAX_TIMES_OF_DAY} distinct entries"
            )));
        }

        let start_date = self.start_date.unwrap_or(today);
        if let Some(end) = self.end_date {
            if end < start_date {
                return Err(ClinicError::BadRequest(
                    "end_date must not be before start_date".to_string(),
                ));
            }
            if end < today {
                return Err(ClinicError::BadRequest(
                    "end_date must not be in the past".to_string(),
                ));
            }
        }

        Ok(NewReminder {
            medicine_name: required_text("medicine_name", &self.medicine_name, 200)?,
            dosage: optional_text("dosage", self.dosage.as_deref(), 200)?,
            times_of_day,
            start_date,
            end_date: self.end_date,
            channel: self.channel,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ReminderListQuery {
    pub patient_id: Option<Uuid>,
}
