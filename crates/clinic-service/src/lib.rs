//! Clinic Service Library
//!
//! Multi-tenant clinic backend: clinic and staff onboarding, patient OTP
//! login, appointment booking, and a live per-doctor queue pushed to
//! browsers over SSE and WebSocket. Medicines, prescriptions, medicine
//! reminders and emergency requests round out the clinic records.
//!
//! # Architecture
//!
//! Handler -> Service -> Repository:
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/*.rs -> repositories/*.rs
//! ```
//!
//! The queue engine (`services::queue_engine`) is pure; `services::queue_service`
//! runs it inside a row-locking transaction and hands the resulting snapshot
//! to `services::queue_broadcaster`.
//!
//! # Modules
//!
//! - `config` - Service configuration from environment
//! - `crypto` - Access tokens, OTP codes, password hashing
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Authentication and HTTP metrics
//! - `models` - Rows, requests and responses
//! - `observability` - Metrics and log-safe hashing
//! - `repositories` - Postgres access
//! - `routes` - Axum router setup
//! - `services` - Business logic
//! - `tasks` - Background reminder delivery and cleanup

pub mod config;
pub mod crypto;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod tasks;
