//! Data models for the clinic service.
//!
//! Row structs map database tables; request types carry `validate()` methods
//! that normalize input before it reaches a repository. Response types never
//! include password or OTP hashes.

use crate::errors::ClinicError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod appointments;
pub mod auth;
pub mod clinics;
pub mod emergency;
pub mod medicines;
pub mod prescriptions;
pub mod queue;
pub mod reminders;
pub mod users;

pub use appointments::*;
pub use auth::*;
pub use clinics::*;
pub use emergency::*;
pub use medicines::*;
pub use prescriptions::*;
pub use queue::*;
pub use reminders::*;
pub use users::*;

/// Returned when a TEXT column holds a value the enum does not know.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares an enum stored as lowercase TEXT in Postgres and as the same
/// string on the wire.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl sqlx::Type<sqlx::Postgres> for $name {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <str as sqlx::Type<sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                <str as sqlx::Type<sqlx::Postgres>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                <&str as sqlx::Encode<'q, sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $name {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let raw = <&str as sqlx::Decode<'r, sqlx::Postgres>>::decode(value)?;
                Ok(raw.parse::<$name>()?)
            }
        }
    };
}

text_enum! {
    /// Approval state of an account.
    pub enum AccountStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

text_enum! {
    /// Lifecycle of a clinic tenant.
    pub enum ClinicStatus {
        Pending => "pending",
        Active => "active",
        Suspended => "suspended",
    }
}

text_enum! {
    /// Appointment lifecycle.
    pub enum AppointmentStatus {
        Booked => "booked",
        Completed => "completed",
        Cancelled => "cancelled",
        NoShow => "no_show",
    }
}

text_enum! {
    /// Position of a queue token in the visit flow.
    pub enum TokenStatus {
        /// Issued, patient not yet at the clinic.
        Waiting => "waiting",
        /// Patient checked in on site.
        CheckedIn => "checked_in",
        /// With the doctor now.
        InConsultation => "in_consultation",
        Served => "served",
        Skipped => "skipped",
        Cancelled => "cancelled",
    }
}

impl TokenStatus {
    /// Tokens still waiting to be called.
    pub fn is_pending(&self) -> bool {
        matches!(self, TokenStatus::Waiting | TokenStatus::CheckedIn)
    }
}

text_enum! {
    /// Emergency request handling state.
    pub enum EmergencyStatus {
        Open => "open",
        Acknowledged => "acknowledged",
        Resolved => "resolved",
    }
}

impl EmergencyStatus {
    /// Whether a request may move from `self` to `next`.
    pub fn can_transition_to(&self, next: EmergencyStatus) -> bool {
        matches!(
            (self, next),
            (EmergencyStatus::Open, EmergencyStatus::Acknowledged)
                | (EmergencyStatus::Open, EmergencyStatus::Resolved)
                | (EmergencyStatus::Acknowledged, EmergencyStatus::Resolved)
        )
    }
}

text_enum! {
    /// Severity reported by the patient.
    pub enum EmergencySeverity {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

text_enum! {
    /// Delivery channel for notifications and OTP codes.
    pub enum NotificationChannel {
        Sms => "sms",
        Email => "email",
    }
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    /// "ready" or "not_ready".
    pub status: &'static str,
    /// Database health.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<&'static str>,
    /// Generic error for operators; details are logged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Input normalization
// ============================================================================

/// Trim and require a non-empty value of bounded length.
pub(crate) fn required_text(field: &str, value: &str, max_len: usize) -> Result<String, ClinicError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ClinicError::BadRequest(format!("{field} is required")));
    }
    if trimmed.chars().count() > max_len {
        return Err(ClinicError::BadRequest(format!(
            "{field} must be at most {max_len} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Trim an optional value; blank becomes `None`.
pub(crate) fn optional_text(
    field: &str,
    value: Option<&str>,
    max_len: usize,
) -> Result<Option<String>, ClinicError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => required_text(field, v, max_len).map(Some),
    }
}

/// Lowercase and sanity-check an email address.
pub(crate) fn normalize_email(value: &str) -> Result<String, ClinicError> {
    let email = value.trim().to_lowercase();
    let valid = email.len() <= 254
        && email.split_once('@').is_some_and(|(local, domain)| {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !domain.contains('@')
        })
        && !email.contains(char::is_whitespace);

    if valid {
        Ok(email)
    } else {
        Err(ClinicError::BadRequest("Invalid email address".to_string()))
    }
}

/// Strip separators from a phone number and require 7 to 15 digits,
/// optionally prefixed with `+`.
pub(crate) fn normalize_phone(value: &str) -> Result<String, ClinicError> {
    let trimmed = value.trim();
    let (prefix, rest) = match trimmed.strip_prefix('+') {
        Some(rest) => ("+", rest),
        None => ("", trimmed),
    };

    let digits: String = rest
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();

    if !(7..=15).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ClinicError::BadRequest("Invalid phone number".to_string()));
    }

    Ok(format!("{prefix}{digits}"))
}

/// Password length rule for staff and admin accounts.
pub(crate) fn validate_password(value: &str) -> Result<(), ClinicError> {
    let len = value.chars().count();
    if !(8..=128).contains(&len) {
        return Err(ClinicError::BadRequest(
            "Password must be between 8 and 128 characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_text_enum_round_trip() {
        for status in [
            TokenStatus::Waiting,
            TokenStatus::CheckedIn,
            TokenStatus::InConsultation,
            TokenStatus::Served,
            TokenStatus::Skipped,
            TokenStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<TokenStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{}\"", status.as_str())
            );
        }
        assert_eq!(AppointmentStatus::NoShow.as_str(), "no_show");
    }

    #[test]
    fn test_text_enum_unknown_value() {
        let err = "paused".parse::<ClinicStatus>().unwrap_err();
        assert_eq!(err.kind, "ClinicStatus");
        assert_eq!(err.to_string(), "Unknown ClinicStatus value: paused");
    }

    #[test]
    fn test_token_status_pending() {
        assert!(TokenStatus::Waiting.is_pending());
        assert!(TokenStatus::CheckedIn.is_pending());
        assert!(!TokenStatus::InConsultation.is_pending());
        assert!(!TokenStatus::Served.is_pending());
        assert!(!TokenStatus::Cancelled.is_pending());
    }

    #[test]
    fn test_emergency_transitions() {
        use EmergencyStatus::*;
        assert!(Open.can_transition_to(Acknowledged));
        assert!(Open.can_transition_to(Resolved));
        assert!(Acknowledged.can_transition_to(Resolved));
        assert!(!Acknowledged.can_transition_to(Open));
        assert!(!Resolved.can_transition_to(Acknowledged));
        assert!(!Open.can_transition_to(Open));
    }

    #[test]
    fn test_required_text() {
        assert_eq!(required_text("name", "  Ana  ", 10).unwrap(), "Ana");
        assert!(required_text("name", "   ", 10).is_err());
        assert!(required_text("name", "abcdefghijk", 10).is_err());
    }

    #[test]
    fn test_optional_text_blank_is_none() {
        assert_eq!(optional_text("notes", Some("  "), 10).unwrap(), None);
        assert_eq!(optional_text("notes", None, 10).unwrap(), None);
        assert_eq!(
            optional_text("notes", Some(" ok "), 10).unwrap(),
            Some("ok".to_string())
        );
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(
            normalize_email(" Dr.Who@Clinic.Test ").unwrap(),
            "dr.who@clinic.test"
        );
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("a@b").is_err());
        assert!(normalize_email("@clinic.test").is_err());
        assert!(normalize_email("a b@clinic.test").is_err());
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+1 (555) 010-0199").unwrap(), "+15550100199");
        assert_eq!(normalize_phone("0712 345 678").unwrap(), "0712345678");
        assert!(normalize_phone("12345").is_err());
        assert!(normalize_phone("+1555abc0100").is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("long enough").is_ok());
    }
}
