//! Clinic service configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use base64::{engine::general_purpose, Engine as _};
use common::config::{LogFormat, ObservabilityConfig};
use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default access token lifetime in seconds.
pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 3600;

/// Default OTP validity window in seconds.
pub const DEFAULT_OTP_TTL_SECONDS: i64 = 300;

/// Default failed OTP attempts before the session locks.
pub const DEFAULT_OTP_MAX_ATTEMPTS: i32 = 5;

/// Default bcrypt cost factor.
pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// Minimum bcrypt cost accepted by configuration.
pub const MIN_BCRYPT_COST: u32 = 4;

/// Maximum bcrypt cost accepted by configuration.
pub const MAX_BCRYPT_COST: u32 = 14;

/// Default consultation length used for new clinics.
pub const DEFAULT_CONSULTATION_MINUTES: i32 = 10;

/// Default geofence radius around a clinic.
pub const DEFAULT_GEOFENCE_RADIUS_METERS: f64 = 200.0;

/// Default lead time for appointment reminders.
pub const DEFAULT_REMINDER_LEAD_MINUTES: i64 = 60;

/// Default reminder scheduler tick.
pub const DEFAULT_REMINDER_INTERVAL_SECONDS: u64 = 60;

/// Default graceful shutdown drain.
pub const DEFAULT_DRAIN_SECONDS: u64 = 5;

/// Clinic service configuration.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Ed25519 seed for access token signing (32 bytes).
    pub jwt_signing_seed: Vec<u8>,

    /// JWT clock skew tolerance in seconds for token validation.
    pub jwt_clock_skew_seconds: i64,

    /// Access token lifetime in seconds.
    pub access_token_ttl_seconds: i64,

    /// OTP validity window in seconds.
    pub otp_ttl_seconds: i64,

    /// Failed verifications before an OTP session locks.
    pub otp_max_attempts: i32,

    /// Bcrypt cost for passwords and OTP hashes.
    pub bcrypt_cost: u32,

    /// Consultation length applied to newly registered clinics.
    pub default_consultation_minutes: i32,

    /// Check-in radius around the clinic in meters.
    pub geofence_radius_meters: f64,

    /// How far ahead appointment reminders go out.
    pub reminder_lead_minutes: i64,

    /// Reminder scheduler tick in seconds.
    pub reminder_interval_seconds: u64,

    /// Notification webhook. `None` logs notifications instead of sending.
    pub notifier_url: Option<String>,

    /// Bearer key for the notification webhook.
    pub notifier_api_key: Option<String>,

    /// Platform operator account created at startup when both are set.
    pub super_admin_email: Option<String>,

    /// Password for the bootstrap platform operator.
    pub super_admin_password: Option<String>,

    /// Graceful shutdown drain in seconds.
    pub drain_seconds: u64,

    /// Logging setup.
    pub observability: ObservabilityConfig,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("jwt_signing_seed", &"[REDACTED]")
            .field("jwt_clock_skew_seconds", &self.jwt_clock_skew_seconds)
            .field("access_token_ttl_seconds", &self.access_token_ttl_seconds)
            .field("otp_ttl_seconds", &self.otp_ttl_seconds)
            .field("otp_max_attempts", &self.otp_max_attempts)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .field(
                "default_consultation_minutes",
                &self.default_consultation_minutes,
            )
            .field("geofence_radius_meters", &self.geofence_radius_meters)
            .field("reminder_lead_minutes", &self.reminder_lead_minutes)
            .field("reminder_interval_seconds", &self.reminder_interval_seconds)
            .field("notifier_url", &self.notifier_url)
            .field(
                "notifier_api_key",
                &self.notifier_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("super_admin_email", &self.super_admin_email)
            .field(
                "super_admin_password",
                &self.super_admin_password.as_ref().map(|_| "[REDACTED]"),
            )
            .field("drain_seconds", &self.drain_seconds)
            .field("observability", &self.observability)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid signing key: {0}")]
    InvalidSigningKey(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl ConfigError {
    fn invalid(name: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Parse an optional numeric variable and check it against an inclusive range.
fn parse_in_range<T>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
    min: T,
    max: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + fmt::Display + Copy,
    T::Err: fmt::Display,
{
    let Some(raw) = vars.get(name) else {
        return Ok(default);
    };

    let value: T = raw.trim().parse().map_err(|e| {
        ConfigError::invalid(name, format!("expected a number, got '{raw}': {e}"))
    })?;

    if value < min || value > max {
        return Err(ConfigError::invalid(
            name,
            format!("must be between {min} and {max}, got {value}"),
        ));
    }

    Ok(value)
}

/// Treat empty values the same as unset.
fn non_empty(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = vars
            .get("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?
            .clone();

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| "0.0.0.0:8080".to_string());

        let signing_key_b64 = vars
            .get("CLINIC_JWT_SIGNING_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("CLINIC_JWT_SIGNING_KEY".to_string()))?;

        let jwt_signing_seed = general_purpose::STANDARD
            .decode(signing_key_b64.trim())
            .map_err(|e| ConfigError::InvalidSigningKey(format!("not valid base64: {e}")))?;

        if jwt_signing_seed.len() != 32 {
            return Err(ConfigError::InvalidSigningKey(format!(
                "Expected 32 bytes, got {}",
                jwt_signing_seed.len()
            )));
        }

        #[allow(clippy::cast_possible_wrap)]
        let jwt_clock_skew_seconds = parse_in_range(
            vars,
            "JWT_CLOCK_SKEW_SECONDS",
            DEFAULT_CLOCK_SKEW.as_secs() as i64,
            1,
            MAX_CLOCK_SKEW.as_secs() as i64,
        )?;

        let access_token_ttl_seconds = parse_in_range(
            vars,
            "ACCESS_TOKEN_TTL_SECONDS",
            DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            1,
            i64::from(u32::MAX),
        )?;

        let otp_ttl_seconds = parse_in_range(
            vars,
            "OTP_TTL_SECONDS",
            DEFAULT_OTP_TTL_SECONDS,
            1,
            86_400,
        )?;

        let otp_max_attempts = parse_in_range(
            vars,
            "OTP_MAX_ATTEMPTS",
            DEFAULT_OTP_MAX_ATTEMPTS,
            1,
            100,
        )?;

        let bcrypt_cost = parse_in_range(
            vars,
            "BCRYPT_COST",
            DEFAULT_BCRYPT_COST,
            MIN_BCRYPT_COST,
            MAX_BCRYPT_COST,
        )?;

        let default_consultation_minutes = parse_in_range(
            vars,
            "DEFAULT_CONSULTATION_MINUTES",
            DEFAULT_CONSULTATION_MINUTES,
            1,
            120,
        )?;

        let geofence_radius_meters = parse_in_range(
            vars,
            "GEOFENCE_RADIUS_METERS",
            DEFAULT_GEOFENCE_RADIUS_METERS,
            1.0,
            100_000.0,
        )?;

        let reminder_lead_minutes = parse_in_range(
            vars,
            "APPOINTMENT_REMINDER_LEAD_MINUTES",
            DEFAULT_REMINDER_LEAD_MINUTES,
            1,
            10_080,
        )?;

        let reminder_interval_seconds = parse_in_range(
            vars,
            "REMINDER_INTERVAL_SECONDS",
            DEFAULT_REMINDER_INTERVAL_SECONDS,
            1,
            86_400,
        )?;

        let drain_seconds = parse_in_range(
            vars,
            "DRAIN_SECONDS",
            DEFAULT_DRAIN_SECONDS,
            0,
            300,
        )?;

        let notifier_url = non_empty(vars, "NOTIFIER_URL");
        let notifier_api_key = non_empty(vars, "NOTIFIER_API_KEY");

        let super_admin_email = non_empty(vars, "SUPER_ADMIN_EMAIL");
        let super_admin_password = non_empty(vars, "SUPER_ADMIN_PASSWORD");
        if super_admin_email.is_some() != super_admin_password.is_some() {
            return Err(ConfigError::invalid(
                "SUPER_ADMIN_EMAIL",
                "SUPER_ADMIN_EMAIL and SUPER_ADMIN_PASSWORD must be set together",
            ));
        }

        let observability = ObservabilityConfig::from_vars(vars);

        Ok(Config {
            database_url,
            bind_address,
            jwt_signing_seed,
            jwt_clock_skew_seconds,
            access_token_ttl_seconds,
            otp_ttl_seconds,
            otp_max_attempts,
            bcrypt_cost,
            default_consultation_minutes,
            geofence_radius_meters,
            reminder_lead_minutes,
            reminder_interval_seconds,
            notifier_url,
            notifier_api_key,
            super_admin_email,
            super_admin_password,
            drain_seconds,
            observability,
        })
    }

    /// Whether logs should be emitted as JSON.
    pub fn json_logs(&self) -> bool {
        self.observability.log_format == LogFormat::Json
    }
}
