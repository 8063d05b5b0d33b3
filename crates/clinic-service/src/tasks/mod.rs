//! Background tasks for the clinic service.
//!
//! # Tasks
//!
//! - `reminder_scheduler` - Sends medicine and appointment reminders
//! - `session_cleanup` - Purges long-expired OTP sessions

pub mod reminder_scheduler;
pub mod session_cleanup;

pub use reminder_scheduler::{start_reminder_scheduler, ReminderSchedulerConfig};
pub use session_cleanup::start_session_cleanup;
