//! Service layer.
//!
//! Business logic between handlers and repositories: the queue engine and
//! its fan-out, OTP login, appointment booking, notifications and the pure
//! geofence and reminder math.

pub mod accounts;
pub mod appointments;
pub mod emergencies;
pub mod geofence;
pub mod notifier;
pub mod otp;
pub mod prescriptions;
pub mod queue_broadcaster;
pub mod queue_engine;
pub mod queue_service;
pub mod reminder_schedule;
