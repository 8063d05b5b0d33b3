//! Patient login with one-time passcodes.
//!
//! A request creates a session holding the bcrypt hash of a fresh 6-digit
//! code and sends the code over SMS or email. Older open sessions for the
//! same identifier are closed first, so only the newest code is accepted.
//! Verification counts failures per session and locks it at the configured
//! maximum. A verified code logs the patient in, creating the account on
//! first use.

use crate::config::Config;
use crate::crypto::{self, TokenSigner};
use crate::errors::ClinicError;
use crate::models::{AccountStatus, NotificationChannel, OtpRequestResponse, TokenResponse};
use crate::observability::hash_for_correlation;
use crate::observability::metrics::{record_notification, record_otp_verification};
use crate::repositories::users::NewUser;
use crate::repositories::{ClinicsRepository, OtpSessionsRepository, UsersRepository};
use crate::services::accounts::token_response;
use crate::services::notifier::{Notification, Notifier};
use chrono::{DateTime, Duration, Utc};
use common::secret::{ExposeSecret, SecretString};
use common::types::Role;
use sqlx::PgPool;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Window for counting OTP requests per identifier.
pub const OTP_REQUEST_WINDOW_MINUTES: i64 = 15;

/// Requests allowed per identifier inside the window.
pub const MAX_OTP_REQUESTS_PER_WINDOW: i64 = 5;

const DEFAULT_PATIENT_NAME: &str = "Patient";

/// OTP settings taken from [`Config`].
#[derive(Debug, Clone, Copy)]
pub struct OtpSettings {
    pub ttl_seconds: i64,
    pub max_attempts: i32,
    pub bcrypt_cost: u32,
}

impl OtpSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ttl_seconds: config.otp_ttl_seconds,
            max_attempts: config.otp_max_attempts,
            bcrypt_cost: config.bcrypt_cost,
        }
    }
}

/// A normalized verification attempt.
#[derive(Debug)]
pub struct OtpAttempt<'a> {
    pub clinic_id: Uuid,
    pub identifier: &'a str,
    pub channel: NotificationChannel,
    pub code: &'a SecretString,
    pub full_name: Option<&'a str>,
}

/// Create a session and deliver its code.
#[instrument(skip_all, name = "clinic.otp.request", fields(channel = %channel))]
pub async fn request_code(
    pool: &PgPool,
    notifier: &dyn Notifier,
    settings: OtpSettings,
    clinic_id: Uuid,
    identifier: &str,
    channel: NotificationChannel,
    now: DateTime<Utc>,
) -> Result<OtpRequestResponse, ClinicError> {
    let clinic = ClinicsRepository::get_active(pool, clinic_id).await?;

    let window_start = now - Duration::minutes(OTP_REQUEST_WINDOW_MINUTES);
    let recent = OtpSessionsRepository::count_since(pool, clinic_id, identifier, window_start).await?;
    if recent >= MAX_OTP_REQUESTS_PER_WINDOW {
        warn!(
            target: "clinic.otp",
            identifier_hash = %hash_for_correlation(identifier),
            "OTP request rate limit hit"
        );
        return Err(ClinicError::RateLimitExceeded);
    }

    let code = crypto::generate_otp_code()?;
    let code_hash = crypto::hash_secret(&code, settings.bcrypt_cost).await?;
    let expires_at = now + Duration::seconds(settings.ttl_seconds);

    let mut tx = pool.begin().await?;
    OtpSessionsRepository::invalidate_open(&mut *tx, clinic_id, identifier).await?;
    OtpSessionsRepository::create(&mut *tx, clinic_id, identifier, channel, &code_hash, expires_at)
        .await?;
    tx.commit().await?;

    let minutes = (settings.ttl_seconds + 59) / 60;
    let body = format!(
        "Your {} verification code is {}. It expires in {} minutes.",
        clinic.name,
        code.expose_secret(),
        minutes
    );
    let notification = match channel {
        NotificationChannel::Sms => Notification::sms(identifier, body),
        NotificationChannel::Email => {
            Notification::email(identifier, format!("{} verification code", clinic.name), body)
        }
    };

    if let Err(e) = notifier.send(&notification).await {
        record_notification("otp", channel.as_str(), "failed");
        return Err(ClinicError::ServiceUnavailable(format!(
            "OTP delivery failed: {e}"
        )));
    }
    record_notification("otp", channel.as_str(), "sent");

    info!(
        target: "clinic.otp",
        identifier_hash = %hash_for_correlation(identifier),
        "OTP sent"
    );

    Ok(OtpRequestResponse {
        channel,
        expires_in_seconds: settings.ttl_seconds,
    })
}

/// Check a code and log the patient in.
#[instrument(skip_all, name = "clinic.otp.verify", fields(channel = %attempt.channel))]
pub async fn verify_code(
    pool: &PgPool,
    signer: &TokenSigner,
    settings: OtpSettings,
    attempt: &OtpAttempt<'_>,
    now: DateTime<Utc>,
) -> Result<TokenResponse, ClinicError> {
    let Some(session) = OtpSessionsRepository::find_open(
        pool,
        attempt.clinic_id,
        attempt.identifier,
        attempt.channel,
    )
    .await?
    else {
        record_otp_verification("not_found");
        return Err(ClinicError::InvalidCredentials);
    };

    if session.expires_at <= now {
        record_otp_verification("expired");
        return Err(ClinicError::InvalidCredentials);
    }
    if session.attempts >= settings.max_attempts {
        record_otp_verification("locked");
        return Err(ClinicError::RateLimitExceeded);
    }

    if !crypto::verify_secret(attempt.code, &session.code_hash).await? {
        let attempts =
            OtpSessionsRepository::record_failed_attempt(pool, session.session_id).await?;
        warn!(
            target: "clinic.otp",
            identifier_hash = %hash_for_correlation(attempt.identifier),
            attempts,
            "OTP mismatch"
        );
        if attempts >= settings.max_attempts {
            record_otp_verification("locked");
            return Err(ClinicError::RateLimitExceeded);
        }
        record_otp_verification("invalid_code");
        return Err(ClinicError::InvalidCredentials);
    }

    // Concurrent verify of the same code: only one wins
    if !OtpSessionsRepository::consume(pool, session.session_id).await? {
        record_otp_verification("not_found");
        return Err(ClinicError::InvalidCredentials);
    }

    let patient = match UsersRepository::find_patient(
        pool,
        attempt.clinic_id,
        attempt.channel,
        attempt.identifier,
    )
    .await?
    {
        Some(user) if user.status == AccountStatus::Approved => user,
        Some(_) => {
            return Err(ClinicError::Forbidden(
                "Patient account is not active".to_string(),
            ))
        }
        None => {
            let (email, phone) = match attempt.channel {
                NotificationChannel::Email => (Some(attempt.identifier), None),
                NotificationChannel::Sms => (None, Some(attempt.identifier)),
            };
            let user = UsersRepository::create(
                pool,
                &NewUser {
                    clinic_id: Some(attempt.clinic_id),
                    role: Role::Patient,
                    status: AccountStatus::Approved,
                    full_name: attempt.full_name.unwrap_or(DEFAULT_PATIENT_NAME),
                    email,
                    phone,
                    password_hash: None,
                },
            )
            .await?;
            info!(target: "clinic.otp", user_id = %user.user_id, "Patient account created");
            user
        }
    };

    record_otp_verification("success");
    token_response(signer, patient)
}
