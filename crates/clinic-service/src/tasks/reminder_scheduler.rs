//! Reminder delivery background task.
//!
//! Each tick:
//! 1. Sends medicine reminders whose `next_fire_at` has passed and schedules
//!    the next occurrence (or deactivates the reminder past its end date)
//! 2. Sends one reminder for every booked appointment starting within the
//!    lead window
//!
//! Failed sends are left in place and retried on the next tick.
//!
//! # Graceful Shutdown
//!
//! The task completes its current tick and exits when the cancellation token
//! is triggered.

use crate::config::Config;
use crate::errors::ClinicError;
use crate::models::NotificationChannel;
use crate::observability::metrics::record_reminder;
use crate::repositories::appointments::DueAppointmentReminder;
use crate::repositories::reminders::DueReminder;
use crate::repositories::{AppointmentsRepository, RemindersRepository};
use crate::services::notifier::{notify_best_effort, Notification, Notifier};
use crate::services::reminder_schedule;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Rows handled per kind and tick.
const DEFAULT_BATCH_SIZE: i64 = 100;

/// Configuration for the reminder scheduler.
#[derive(Debug, Clone)]
pub struct ReminderSchedulerConfig {
    /// Seconds between ticks.
    pub interval_seconds: u64,
    /// How far ahead appointment reminders go out.
    pub lead_minutes: i64,
    /// Maximum reminders of each kind per tick.
    pub batch_size: i64,
}

impl ReminderSchedulerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval_seconds: config.reminder_interval_seconds,
            lead_minutes: config.reminder_lead_minutes,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// What one tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReminderRunStats {
    pub medicine_sent: usize,
    pub appointment_sent: usize,
    /// Patients with no phone or email; the occurrence is dropped.
    pub skipped: usize,
    /// Sends or database writes that failed and will be retried.
    pub failed: usize,
}

/// Outcome of one reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    Skipped,
    Failed,
}

/// Start the reminder scheduler.
///
/// Returns when the cancellation token is triggered.
#[instrument(skip_all, name = "clinic.task.reminder_scheduler")]
pub async fn start_reminder_scheduler(
    pool: PgPool,
    notifier: Arc<dyn Notifier>,
    config: ReminderSchedulerConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "clinic.task.reminders",
        interval_seconds = config.interval_seconds,
        lead_minutes = config.lead_minutes,
        "Starting reminder scheduler"
    );

    let mut interval = tokio::time::interval(Duration::from_secs(config.interval_seconds));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_reminders(&pool, notifier.as_ref(), &config, Utc::now()).await;
            }
            _ = cancel_token.cancelled() => {
                info!(
                    target: "clinic.task.reminders",
                    "Reminder scheduler received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "clinic.task.reminders", "Reminder scheduler stopped");
}

/// Run a single tick as of `now`.
pub async fn run_reminders(
    pool: &PgPool,
    notifier: &dyn Notifier,
    config: &ReminderSchedulerConfig,
    now: DateTime<Utc>,
) -> ReminderRunStats {
    let mut stats = ReminderRunStats::default();

    match RemindersRepository::due(pool, now, config.batch_size).await {
        Ok(due) => {
            for reminder in due {
                match send_medicine_reminder(pool, notifier, &reminder, now).await {
                    Ok(Delivery::Sent) => stats.medicine_sent += 1,
                    Ok(Delivery::Skipped) => stats.skipped += 1,
                    Ok(Delivery::Failed) => stats.failed += 1,
                    Err(e) => {
                        stats.failed += 1;
                        error!(
                            target: "clinic.task.reminders",
                            reminder_id = %reminder.reminder.reminder_id,
                            error = %e,
                            "Failed to process medicine reminder"
                        );
                    }
                }
            }
        }
        Err(e) => {
            error!(target: "clinic.task.reminders", error = %e, "Failed to load due medicine reminders");
        }
    }

    let until = now + ChronoDuration::minutes(config.lead_minutes);
    match AppointmentsRepository::due_for_reminder(pool, now, until, config.batch_size).await {
        Ok(due) => {
            for appointment in due {
                match send_appointment_reminder(pool, notifier, &appointment).await {
                    Ok(Delivery::Sent) => stats.appointment_sent += 1,
                    Ok(Delivery::Skipped) => stats.skipped += 1,
                    Ok(Delivery::Failed) => stats.failed += 1,
                    Err(e) => {
                        stats.failed += 1;
                        error!(
                            target: "clinic.task.reminders",
                            appointment_id = %appointment.appointment_id,
                            error = %e,
                            "Failed to process appointment reminder"
                        );
                    }
                }
            }
        }
        Err(e) => {
            error!(target: "clinic.task.reminders", error = %e, "Failed to load due appointments");
        }
    }

    if stats != ReminderRunStats::default() {
        info!(
            target: "clinic.task.reminders",
            medicine_sent = stats.medicine_sent,
            appointment_sent = stats.appointment_sent,
            skipped = stats.skipped,
            failed = stats.failed,
            "Reminder tick complete"
        );
    }
    stats
}

/// The channel the patient chose, falling back to whatever contact exists.
fn medicine_notification(due: &DueReminder) -> Option<Notification> {
    let reminder = &due.reminder;
    let body = match &reminder.dosage {
        Some(dosage) => format!(
            "Hi {}, time to take {} ({}).",
            due.patient_name, reminder.medicine_name, dosage
        ),
        None => format!("Hi {}, time to take {}.", due.patient_name, reminder.medicine_name),
    };
    let subject = "Medicine reminder";

    match (reminder.channel, &due.patient_phone, &due.patient_email) {
        (NotificationChannel::Sms, Some(phone), _) => Some(Notification::sms(phone.clone(), body)),
        (NotificationChannel::Email, _, Some(email)) => {
            Some(Notification::email(email.clone(), subject, body))
        }
        _ => Notification::to_contact(
            due.patient_phone.as_deref(),
            due.patient_email.as_deref(),
            subject,
            body,
        ),
    }
}

async fn send_medicine_reminder(
    pool: &PgPool,
    notifier: &dyn Notifier,
    due: &DueReminder,
    now: DateTime<Utc>,
) -> Result<Delivery, ClinicError> {
    let reminder = &due.reminder;
    let times = reminder.parsed_times()?;
    let fired_at = reminder.next_fire_at.unwrap_or(now);
    // Missed occurrences collapse into this one send
    let next = reminder_schedule::next_fire_after(&times, fired_at.max(now), reminder.end_date);

    let Some(notification) = medicine_notification(due) else {
        warn!(
            target: "clinic.task.reminders",
            reminder_id = %reminder.reminder_id,
            "Patient has no contact details, skipping occurrence"
        );
        record_reminder("medicine", "skipped");
        RemindersRepository::advance(pool, reminder.reminder_id, None, next).await?;
        return Ok(Delivery::Skipped);
    };

    if !notify_best_effort(notifier, "reminder", notification).await {
        record_reminder("medicine", "failed");
        return Ok(Delivery::Failed);
    }

    record_reminder("medicine", "sent");
    RemindersRepository::advance(pool, reminder.reminder_id, Some(now), next).await?;
    Ok(Delivery::Sent)
}

async fn send_appointment_reminder(
    pool: &PgPool,
    notifier: &dyn Notifier,
    due: &DueAppointmentReminder,
) -> Result<Delivery, ClinicError> {
    let body = format!(
        "{}: reminder of your appointment with {} at {} UTC.",
        due.clinic_name,
        due.doctor_name,
        due.scheduled_at.format("%Y-%m-%d %H:%M")
    );

    let Some(notification) = Notification::to_contact(
        due.patient_phone.as_deref(),
        due.patient_email.as_deref(),
        "Appointment reminder",
        body,
    ) else {
        record_reminder("appointment", "skipped");
        AppointmentsRepository::mark_reminder_sent(pool, due.appointment_id).await?;
        return Ok(Delivery::Skipped);
    };

    if !notify_best_effort(notifier, "reminder", notification).await {
        record_reminder("appointment", "failed");
        return Ok(Delivery::Failed);
    }

    record_reminder("appointment", "sent");
    AppointmentsRepository::mark_reminder_sent(pool, due.appointment_id).await?;
    Ok(Delivery::Sent)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::MedicineReminderRow;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn due(channel: NotificationChannel, phone: Option<&str>, email: Option<&str>) -> DueReminder {
        let now = Utc::now();
        DueReminder {
            reminder: MedicineReminderRow {
                reminder_id: Uuid::new_v4(),
                clinic_id: Uuid::new_v4(),
                patient_id: Uuid::new_v4(),
                medicine_name: "Amoxicillin".to_string(),
                dosage: Some("500 mg".to_string()),
                times_of_day: vec!["08:00".to_string()],
                start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                end_date: None,
                channel,
                is_active: true,
                next_fire_at: Some(now),
                last_sent_at: None,
                created_by: Uuid::new_v4(),
                created_at: now,
            },
            patient_name: "Ada".to_string(),
            patient_email: email.map(str::to_string),
            patient_phone: phone.map(str::to_string),
        }
    }

    #[test]
    fn test_uses_chosen_channel() {
        let n = medicine_notification(&due(
            NotificationChannel::Email,
            Some("+15550100100"),
            Some("ada@example.test"),
        ))
        .unwrap();
        assert_eq!(n.channel, NotificationChannel::Email);
        assert_eq!(n.recipient, "ada@example.test");
        assert!(n.body.contains("Amoxicillin (500 mg)"));
    }

    #[test]
    fn test_falls_back_to_available_contact() {
        let n = medicine_notification(&due(NotificationChannel::Sms, None, Some("ada@example.test")))
            .unwrap();
        assert_eq!(n.channel, NotificationChannel::Email);

        assert!(medicine_notification(&due(NotificationChannel::Sms, None, None)).is_none());
    }

    #[test]
    fn test_config_from_service_config() {
        let vars = std::collections::HashMap::from([
            ("DATABASE_URL".to_string(), "postgres://localhost/clinic".to_string()),
            (
                "CLINIC_JWT_SIGNING_KEY".to_string(),
                "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_string(),
            ),
        ]);
        let config = Config::from_vars(&vars).unwrap();
        let scheduler = ReminderSchedulerConfig::from_config(&config);
        assert_eq!(scheduler.interval_seconds, config.reminder_interval_seconds);
        assert_eq!(scheduler.lead_minutes, config.reminder_lead_minutes);
        assert_eq!(scheduler.batch_size, DEFAULT_BATCH_SIZE);
    }
}
