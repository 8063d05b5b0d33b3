//! HTTP request handlers for the clinic service.

pub mod appointments;
pub mod auth;
pub mod clinics;
pub mod emergencies;
pub mod health;
pub mod me;
pub mod medicines;
pub mod metrics;
pub mod prescriptions;
pub mod queue;
pub mod reminders;
pub mod users;

pub use appointments::{cancel_appointment, create_appointment, get_appointment, list_appointments};
pub use auth::{login, register_account, request_otp, verify_otp};
pub use clinics::{
    approve_clinic, get_clinic, list_clinics, register_clinic, suspend_clinic, update_clinic,
};
pub use emergencies::{create_emergency, list_emergencies, update_emergency};
pub use health::{health_check, readiness_check};
pub use me::get_me;
pub use medicines::{
    adjust_stock, create_medicine, delete_medicine, get_medicine, list_medicines, update_medicine,
};
pub use metrics::metrics_handler;
pub use prescriptions::{create_prescription, get_prescription, list_prescriptions};
pub use queue::{
    call_next, check_in, complete_token, get_queue, queue_events, queue_ws, report_delay,
    skip_token, walk_in,
};
pub use reminders::{create_reminder, delete_reminder, list_reminders};
pub use users::{approve_user, create_user, list_doctors, list_users, reject_user};
