//! Middleware for the clinic service.
//!
//! # Components
//!
//! - `auth` - Access token check for protected routes, role and tenant guards
//! - `http_metrics` - Request metrics for every response

pub mod auth;
pub mod http_metrics;

pub use auth::{ensure_same_clinic, require_auth, require_role, AuthState, AuthUser};
pub use http_metrics::http_metrics_middleware;
