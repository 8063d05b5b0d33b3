//! JWT utilities shared across clinic components.
//!
//! Provides:
//! - Size limits for DoS prevention
//! - Clock skew constants for iat validation
//! - Key ID extraction from JWT headers
//! - iat validation logic
//! - The access token claims structure
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Generic error messages prevent information leakage
//! - `sub` and `jti` in [`UserClaims`] are redacted in Debug output

use crate::types::{ClinicId, Role, UserId};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Tokens larger than this are rejected before any base64 decoding or
/// signature work. Typical access tokens are 300-400 bytes.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default JWT clock skew tolerance (5 minutes).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during JWT validation.
///
/// All variants share one client-facing message. Details are logged at debug
/// level.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token is missing required `kid` header.
    #[error("The access token is invalid or expired")]
    MissingKid,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,

    /// A claim could not be interpreted (bad UUID, unknown role).
    #[error("The access token is invalid or expired")]
    InvalidClaim,
}

// =============================================================================
// Claims Types
// =============================================================================

/// Access token claims.
///
/// Issued after password or OTP login. `clinic_id` is absent only for
/// super-admins, who are not bound to a tenant.
#[derive(Clone, Serialize, Deserialize)]
pub struct UserClaims {
    /// Subject (user UUID) - redacted in Debug output.
    pub sub: String,

    /// Clinic the user belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinic_id: Option<String>,

    /// Account role.
    pub role: Role,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Unique token identifier - redacted in Debug output.
    pub jti: String,
}

impl fmt::Debug for UserClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserClaims")
            .field("sub", &"[REDACTED]")
            .field("clinic_id", &self.clinic_id)
            .field("role", &self.role)
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .field("jti", &"[REDACTED]")
            .finish()
    }
}

impl UserClaims {
    /// Parse the subject as a user id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClaim` if `sub` is not a UUID.
    pub fn user_id(&self) -> Result<UserId, JwtValidationError> {
        Uuid::parse_str(&self.sub)
            .map(UserId)
            .map_err(|_| JwtValidationError::InvalidClaim)
    }

    /// Parse the clinic id, if present.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClaim` if `clinic_id` is present but not a UUID.
    pub fn clinic_id(&self) -> Result<Option<ClinicId>, JwtValidationError> {
        self.clinic_id
            .as_deref()
            .map(|raw| {
                Uuid::parse_str(raw)
                    .map(ClinicId)
                    .map_err(|_| JwtValidationError::InvalidClaim)
            })
            .transpose()
    }

    /// Check whether the token's role is one of `roles`.
    #[must_use]
    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.contains(&self.role)
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Extract the `kid` (key ID) from a JWT header without verifying the signature.
///
/// The token MUST still be verified after the key is selected.
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds size limit
/// - `MalformedToken` - Wrong structure, bad base64, invalid JSON
/// - `MissingKid` - Header missing `kid` or `kid` is not a non-empty string
pub fn extract_kid(token: &str) -> Result<String, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    // JWT format: header.payload.signature
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        tracing::debug!(
            target: "common.jwt",
            parts = parts.len(),
            "Token rejected: invalid JWT format"
        );
        return Err(JwtValidationError::MalformedToken);
    }

    let header_part = parts.first().ok_or(JwtValidationError::MalformedToken)?;
    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtValidationError::MalformedToken
    })?;

    let header: serde_json::Value = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtValidationError::MalformedToken
    })?;

    let kid = header
        .get("kid")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or(JwtValidationError::MissingKid)?;

    Ok(kid)
}

/// Validate the `iat` (issued-at) claim with clock skew tolerance.
///
/// # Errors
///
/// Returns `IatTooFarInFuture` if `iat` is more than `clock_skew` ahead of now.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

/// Deterministic `iat` validation against an explicit `now` timestamp.
pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // clock_skew is bounded to MAX_CLOCK_SKEW (600 seconds)
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now + clock_skew_secs;

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            clock_skew_secs = clock_skew_secs,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::cast_possible_wrap)]
mod tests {
    use super::*;

    fn claims(role: Role, clinic_id: Option<String>) -> UserClaims {
        UserClaims {
            sub: "6f1c9a52-3b7e-4d0e-9f59-0c2f3a1b2c3d".to_string(),
            clinic_id,
            role,
            iat: 1_700_000_000,
            exp: 1_700_003_600,
            jti: "jti-secret-value".to_string(),
        }
    }

    #[test]
    fn test_extract_kid_valid_token() {
        let header = r#"{"alg":"EdDSA","typ":"JWT","kid":"clinic-01"}"#;
        let header_b64 = URL_SAFE_NO_PAD.encode(header);
        let token = format!("{header_b64}.payload.signature");

        assert_eq!(extract_kid(&token).unwrap(), "clinic-01");
    }

    #[test]
    fn test_extract_kid_missing_kid() {
        let header = r#"{"alg":"EdDSA","typ":"JWT"}"#;
        let header_b64 = URL_SAFE_NO_PAD.encode(header);
        let token = format!("{header_b64}.payload.signature");

        assert!(matches!(
            extract_kid(&token),
            Err(JwtValidationError::MissingKid)
        ));
    }

    #[test]
    fn test_extract_kid_empty_kid() {
        let header = r#"{"alg":"EdDSA","typ":"JWT","kid":""}"#;
        let header_b64 = URL_SAFE_NO_PAD.encode(header);
        let token = format!("{header_b64}.payload.signature");

        assert!(matches!(
            extract_kid(&token),
            Err(JwtValidationError::MissingKid)
        ));
    }

    #[test]
    fn test_extract_kid_malformed_token() {
        assert!(matches!(
            extract_kid("not-a-jwt"),
            Err(JwtValidationError::MalformedToken)
        ));
        assert!(matches!(
            extract_kid(""),
            Err(JwtValidationError::MalformedToken)
        ));
    }

    #[test]
    fn test_extract_kid_invalid_json() {
        let header_b64 = URL_SAFE_NO_PAD.encode("not-json");
        let token = format!("{header_b64}.payload.signature");

        assert!(matches!(
            extract_kid(&token),
            Err(JwtValidationError::MalformedToken)
        ));
    }

    #[test]
    fn test_extract_kid_oversized_token() {
        let oversized = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        assert!(matches!(
            extract_kid(&oversized),
            Err(JwtValidationError::TokenTooLarge)
        ));
    }

    #[test]
    fn test_validate_iat_past_and_present() {
        let now = chrono::Utc::now().timestamp();
        assert!(validate_iat(now, DEFAULT_CLOCK_SKEW).is_ok());
        assert!(validate_iat(now - 3600, DEFAULT_CLOCK_SKEW).is_ok());
    }

    #[test]
    fn test_validate_iat_at_boundary_exact() {
        let now = 1_700_000_000_i64;

        assert!(validate_iat_at(now + 300, DEFAULT_CLOCK_SKEW, now).is_ok());
        assert!(matches!(
            validate_iat_at(now + 301, DEFAULT_CLOCK_SKEW, now),
            Err(JwtValidationError::IatTooFarInFuture)
        ));
    }

    #[test]
    fn test_user_claims_debug_redacts_identifiers() {
        let debug_str = format!("{:?}", claims(Role::Patient, None));

        assert!(!debug_str.contains("6f1c9a52"));
        assert!(!debug_str.contains("jti-secret-value"));
        assert!(debug_str.contains("[REDACTED]"));
        assert!(debug_str.contains("Patient"));
    }

    #[test]
    fn test_user_claims_parses_ids() {
        let clinic = "a0b1c2d3-e4f5-4a6b-8c7d-9e0f1a2b3c4d".to_string();
        let c = claims(Role::Doctor, Some(clinic.clone()));

        assert_eq!(c.user_id().unwrap().to_string(), c.sub);
        assert_eq!(c.clinic_id().unwrap().unwrap().to_string(), clinic);
    }

    #[test]
    fn test_user_claims_rejects_bad_ids() {
        let mut c = claims(Role::Staff, Some("not-a-uuid".to_string()));
        assert_eq!(c.clinic_id(), Err(JwtValidationError::InvalidClaim));

        c.sub = "nope".to_string();
        assert_eq!(c.user_id(), Err(JwtValidationError::InvalidClaim));
    }

    #[test]
    fn test_super_admin_has_no_clinic() {
        let c = claims(Role::SuperAdmin, None);
        assert_eq!(c.clinic_id().unwrap(), None);

        let json = serde_json::to_string(&c).unwrap();
        assert!(!json.contains("clinic_id"));
        assert!(json.contains("\"role\":\"super_admin\""));
    }

    #[test]
    fn test_has_any_role() {
        let c = claims(Role::Doctor, None);
        assert!(c.has_any_role(&[Role::Staff, Role::Doctor]));
        assert!(!c.has_any_role(&[Role::Patient]));
    }
}
