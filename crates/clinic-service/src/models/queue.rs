//! Queue token models and the snapshot pushed to live viewers.

use super::{optional_text, TokenStatus};
use crate::errors::ClinicError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Database row for a queue token, joined with the patient's name.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct QueueTokenRow {
    pub token_id: Uuid,
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub appointment_id: Option<Uuid>,
    pub queue_date: NaiveDate,
    pub token_number: i32,
    pub scheduled_at: DateTime<Utc>,
    pub status: TokenStatus,
    pub estimated_wait_minutes: Option<i32>,
    pub estimated_call_at: Option<DateTime<Utc>>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub called_at: Option<DateTime<Utc>>,
    pub served_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Database row for a doctor delay report.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DelayNotificationRow {
    pub delay_id: Uuid,
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub queue_date: NaiveDate,
    pub delay_minutes: i32,
    pub reason: Option<String>,
    pub reported_by: Uuid,
    pub notified_count: i32,
    pub created_at: DateTime<Utc>,
}

/// Walk-in registration at the front desk.
#[derive(Debug, Deserialize)]
pub struct WalkInRequest {
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
}

/// Patient location at check-in.
#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    pub latitude: f64,
    pub longitude: f64,
}

/// Doctor running late.
#[derive(Debug, Deserialize)]
pub struct DelayRequest {
    pub minutes: i32,
    #[serde(default)]
    pub reason: Option<String>,
}

impl DelayRequest {
    pub fn validate(&self) -> Result<Option<String>, ClinicError> {
        if !(1..=240).contains(&self.minutes) {
            return Err(ClinicError::BadRequest(
                "minutes must be between 1 and 240".to_string(),
            ));
        }
        optional_text("reason", self.reason.as_deref(), 500)
    }
}

/// Selects the queue day; defaults to today (UTC).
#[derive(Debug, Default, Deserialize)]
pub struct QueueQuery {
    pub date: Option<NaiveDate>,
}

/// One line of the queue board.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    pub token_id: Uuid,
    pub token_number: i32,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub appointment_id: Option<Uuid>,
    pub status: TokenStatus,
    pub scheduled_at: DateTime<Utc>,
    pub estimated_wait_minutes: Option<i32>,
    pub estimated_call_at: Option<DateTime<Utc>>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub called_at: Option<DateTime<Utc>>,
}

impl From<&QueueTokenRow> for QueueEntry {
    fn from(row: &QueueTokenRow) -> Self {
        QueueEntry {
            token_id: row.token_id,
            token_number: row.token_number,
            patient_id: row.patient_id,
            patient_name: row.patient_name.clone(),
            appointment_id: row.appointment_id,
            status: row.status,
            scheduled_at: row.scheduled_at,
            estimated_wait_minutes: row.estimated_wait_minutes,
            estimated_call_at: row.estimated_call_at,
            checked_in_at: row.checked_in_at,
            called_at: row.called_at,
        }
    }
}

/// Full state of one doctor's queue for one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSnapshot {
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    /// Token number currently with the doctor.
    pub now_serving: Option<i32>,
    /// Tokens still waiting to be called.
    pub queue_length: usize,
    pub average_consultation_minutes: i32,
    pub delay_minutes: i32,
    pub entries: Vec<QueueEntry>,
}

/// Who is looking at a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueViewer {
    /// Staff, doctors and admins see every entry.
    Staff,
    /// Patients see aggregate numbers and their own entries only.
    Patient(Uuid),
}

impl QueueSnapshot {
    /// Snapshot as seen by `viewer`.
    pub fn view_for(&self, viewer: QueueViewer) -> QueueSnapshot {
        match viewer {
            QueueViewer::Staff => self.clone(),
            QueueViewer::Patient(patient_id) => QueueSnapshot {
                entries: self
                    .entries
                    .iter()
                    .filter(|e| e.patient_id == patient_id)
                    .cloned()
                    .collect(),
                ..self.clone_header()
            },
        }
    }

    fn clone_header(&self) -> QueueSnapshot {
        QueueSnapshot {
            clinic_id: self.clinic_id,
            doctor_id: self.doctor_id,
            date: self.date,
            generated_at: self.generated_at,
            now_serving: self.now_serving,
            queue_length: self.queue_length,
            average_consultation_minutes: self.average_consultation_minutes,
            delay_minutes: self.delay_minutes,
            entries: Vec::new(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn entry(number: i32, patient_id: Uuid) -> QueueEntry {
        QueueEntry {
            token_id: Uuid::new_v4(),
            token_number: number,
            patient_id,
            patient_name: format!("Patient {number}"),
            appointment_id: None,
            status: TokenStatus::Waiting,
            scheduled_at: Utc::now(),
            estimated_wait_minutes: Some(number * 10),
            estimated_call_at: None,
            checked_in_at: None,
            called_at: None,
        }
    }

    #[test]
    fn test_patient_view_hides_other_patients() {
        let me = Uuid::new_v4();
        let snapshot = QueueSnapshot {
            clinic_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            date: Utc::now().date_naive(),
            generated_at: Utc::now(),
            now_serving: Some(1),
            queue_length: 3,
            average_consultation_minutes: 10,
            delay_minutes: 5,
            entries: vec![
                entry(1, Uuid::new_v4()),
                entry(2, me),
                entry(3, Uuid::new_v4()),
            ],
        };

        let view = snapshot.view_for(QueueViewer::Patient(me));
        assert_eq!(view.entries.len(), 1);
        assert_eq!(view.entries.first().unwrap().token_number, 2);
        assert_eq!(view.queue_length, 3);
        assert_eq!(view.now_serving, Some(1));
        assert_eq!(view.delay_minutes, 5);

        assert_eq!(snapshot.view_for(QueueViewer::Staff), snapshot);
    }

    #[test]
    fn test_delay_request_bounds() {
        let ok = DelayRequest {
            minutes: 240,
            reason: Some("  surgery ran long ".to_string()),
        };
        assert_eq!(ok.validate().unwrap().as_deref(), Some("surgery ran long"));

        for minutes in [0, 241, -5] {
            let bad = DelayRequest {
                minutes,
                reason: None,
            };
            assert!(bad.validate().is_err());
        }
    }
}
