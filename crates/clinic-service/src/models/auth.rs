//! Login and OTP request/response types.

use super::{normalize_email, normalize_phone, optional_text, NotificationChannel, UserResponse};
use crate::errors::ClinicError;
use chrono::{DateTime, Utc};
use common::secret::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Database row for an OTP session.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OtpSessionRow {
    pub session_id: Uuid,
    pub clinic_id: Uuid,
    pub identifier: String,
    pub channel: NotificationChannel,
    pub code_hash: String,
    pub attempts: i32,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Normalize an OTP identifier according to its channel.
pub(crate) fn normalize_identifier(
    channel: NotificationChannel,
    identifier: &str,
) -> Result<String, ClinicError> {
    match channel {
        NotificationChannel::Sms => normalize_phone(identifier),
        NotificationChannel::Email => normalize_email(identifier),
    }
}

/// Ask for a one-time passcode.
#[derive(Debug, Deserialize)]
pub struct OtpRequest {
    pub clinic_id: Uuid,
    pub identifier: String,
    pub channel: NotificationChannel,
}

impl OtpRequest {
    pub fn validate(&self) -> Result<String, ClinicError> {
        normalize_identifier(self.channel, &self.identifier)
    }
}

/// Accepted OTP request. The code itself only travels over the channel.
#[derive(Debug, Serialize)]
pub struct OtpRequestResponse {
    pub channel: NotificationChannel,
    pub expires_in_seconds: i64,
}

/// Submit a one-time passcode.
#[derive(Debug, Deserialize)]
pub struct OtpVerifyRequest {
    pub clinic_id: Uuid,
    pub identifier: String,
    pub channel: NotificationChannel,
    pub code: SecretString,
    /// Used when the verification creates a new patient account.
    #[serde(default)]
    pub full_name: Option<String>,
}

impl OtpVerifyRequest {
    /// Returns the normalized identifier and optional display name.
    pub fn validate(&self) -> Result<(String, Option<String>), ClinicError> {
        let code = self.code.expose_secret();
        if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(ClinicError::BadRequest("code must be 6 digits".to_string()));
        }
        let identifier = normalize_identifier(self.channel, &self.identifier)?;
        let full_name = optional_text("full_name", self.full_name.as_deref(), 200)?;
        Ok((identifier, full_name))
    }
}

/// Email and password login for staff and admins.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: SecretString,
}

/// Issued access token.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: UserResponse,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn verify(code: &str, channel: NotificationChannel, identifier: &str) -> OtpVerifyRequest {
        OtpVerifyRequest {
            clinic_id: Uuid::new_v4(),
            identifier: identifier.to_string(),
            channel,
            code: SecretString::from(code),
            full_name: None,
        }
    }

    #[test]
    fn test_identifier_follows_channel() {
        assert_eq!(
            normalize_identifier(NotificationChannel::Sms, "+1 555-010-0100").unwrap(),
            "+15550100100"
        );
        assert_eq!(
            normalize_identifier(NotificationChannel::Email, "Pat@Mail.Test").unwrap(),
            "pat@mail.test"
        );
        assert!(normalize_identifier(NotificationChannel::Sms, "pat@mail.test").is_err());
    }

    #[test]
    fn test_verify_requires_six_digits() {
        assert!(verify("123456", NotificationChannel::Sms, "+15550100100")
            .validate()
            .is_ok());
        assert!(verify("12345", NotificationChannel::Sms, "+15550100100")
            .validate()
            .is_err());
        assert!(verify("12a456", NotificationChannel::Sms, "+15550100100")
            .validate()
            .is_err());
    }

    #[test]
    fn test_login_request_debug_hides_password() {
        let req: LoginRequest =
            serde_json::from_str(r#"{"email":"a@b.test","password":"open-sesame"}"#).unwrap();
        assert!(!format!("{req:?}").contains("open-sesame"));
    }
}
