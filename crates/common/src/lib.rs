//! Common utilities and types shared across clinic components.

#![warn(clippy::pedantic)]

/// Module for shared domain types (roles, identifiers)
pub mod types;

/// Module for common configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (validation, claims, constants)
pub mod jwt;
