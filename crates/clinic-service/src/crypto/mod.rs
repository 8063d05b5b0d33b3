//! Cryptographic primitives: access token signing, OTP codes, bcrypt.
//!
//! Access tokens are EdDSA (Ed25519) JWTs. The signing key is derived from
//! a 32-byte seed held in configuration; the key id is derived from the
//! public key so a rotated seed produces a distinct `kid`.

use crate::errors::ClinicError;
use common::jwt::{extract_kid, validate_iat, UserClaims};
use common::secret::{ExposeSecret, SecretString};
use common::types::Role;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{Ed25519KeyPair, KeyPair};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

const INVALID_TOKEN_MESSAGE: &str = "The access token is invalid or expired";

/// Build a PKCS#8 v1 document (RFC 8410) from an Ed25519 seed.
///
/// `jsonwebtoken` wants DER, while configuration carries the bare seed.
pub fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    // SEQUENCE { INTEGER 0, SEQUENCE { OID 1.3.101.112 }, OCTET STRING { OCTET STRING seed } }
    let mut pkcs8 = Vec::with_capacity(48);
    pkcs8.extend_from_slice(&[0x30, 0x2e]);
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);
    pkcs8
}

/// Signs and verifies access tokens.
pub struct TokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    key_id: String,
    ttl_seconds: i64,
    clock_skew: Duration,
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner")
            .field("key_id", &self.key_id)
            .field("ttl_seconds", &self.ttl_seconds)
            .field("clock_skew", &self.clock_skew)
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    /// Derive the keypair from a 32-byte seed.
    pub fn from_seed(
        seed: &[u8],
        ttl_seconds: i64,
        clock_skew_seconds: i64,
    ) -> Result<Self, ClinicError> {
        let seed: [u8; 32] = seed
            .try_into()
            .map_err(|_| ClinicError::Internal("signing seed must be 32 bytes".to_string()))?;

        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed)
            .map_err(|e| ClinicError::Internal(format!("invalid signing seed: {e}")))?;
        let public_key = key_pair.public_key().as_ref();

        let fingerprint = hex::encode(Sha256::digest(public_key));
        let key_id = format!("clinic-{}", fingerprint.get(..8).unwrap_or(fingerprint.as_str()));

        Ok(Self {
            encoding_key: EncodingKey::from_ed_der(&build_pkcs8_from_seed(&seed)),
            decoding_key: DecodingKey::from_ed_der(public_key),
            key_id,
            ttl_seconds,
            clock_skew: Duration::from_secs(clock_skew_seconds.unsigned_abs()),
        })
    }

    /// Key id placed in every token header.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Token lifetime in seconds.
    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    /// Issue an access token valid from now.
    pub fn issue(
        &self,
        user_id: Uuid,
        clinic_id: Option<Uuid>,
        role: Role,
    ) -> Result<String, ClinicError> {
        self.issue_at(user_id, clinic_id, role, chrono::Utc::now().timestamp())
    }

    /// Issue an access token with an explicit `iat`.
    #[instrument(skip_all, name = "clinic.crypto.issue")]
    pub fn issue_at(
        &self,
        user_id: Uuid,
        clinic_id: Option<Uuid>,
        role: Role,
        iat: i64,
    ) -> Result<String, ClinicError> {
        let claims = UserClaims {
            sub: user_id.to_string(),
            clinic_id: clinic_id.map(|id| id.to_string()),
            role,
            iat,
            exp: iat + self.ttl_seconds,
            jti: Uuid::new_v4().to_string(),
        };

        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.key_id.clone());

        encode(&header, &claims, &self.encoding_key)
            .map_err(|e| ClinicError::Internal(format!("JWT signing failed: {e}")))
    }

    /// Verify signature, expiry, key id and `iat`.
    #[instrument(skip_all, name = "clinic.crypto.verify")]
    pub fn verify(&self, token: &str) -> Result<UserClaims, ClinicError> {
        // Size, structure and kid checks before any signature work
        let kid = extract_kid(token)?;
        if kid != self.key_id {
            tracing::debug!(target: "clinic.crypto", kid = %kid, "Token signed with unknown key");
            return Err(ClinicError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string()));
        }

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let token_data =
            decode::<UserClaims>(token, &self.decoding_key, &validation).map_err(|e| {
                tracing::debug!(target: "clinic.crypto", error = %e, "Token verification failed");
                ClinicError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string())
            })?;

        validate_iat(token_data.claims.iat, self.clock_skew)?;

        Ok(token_data.claims)
    }
}

/// Generate a uniformly distributed 6-digit code.
pub fn generate_otp_code() -> Result<SecretString, ClinicError> {
    // Largest multiple of 1_000_000 below 2^32; values above it are redrawn
    const LIMIT: u32 = 4_294_000_000;

    let rng = SystemRandom::new();
    loop {
        let mut bytes = [0u8; 4];
        rng.fill(&mut bytes)
            .map_err(|_| ClinicError::Internal("random generation failed".to_string()))?;
        let value = u32::from_be_bytes(bytes);
        if value < LIMIT {
            return Ok(SecretString::from(format!("{:06}", value % 1_000_000)));
        }
    }
}

/// Hash a password or OTP code with bcrypt on the blocking pool.
pub async fn hash_secret(secret: &SecretString, cost: u32) -> Result<String, ClinicError> {
    let plain = secret.expose_secret().to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(plain, cost))
        .await
        .map_err(|e| ClinicError::Internal(format!("hash task failed: {e}")))?
        .map_err(|e| ClinicError::Internal(format!("hashing failed: {e}")))
}

/// Check a password or OTP code against a bcrypt hash on the blocking pool.
pub async fn verify_secret(secret: &SecretString, hash: &str) -> Result<bool, ClinicError> {
    let plain = secret.expose_secret().to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || bcrypt::verify(plain, &hash))
        .await
        .map_err(|e| ClinicError::Internal(format!("verify task failed: {e}")))?
        .map_err(|e| ClinicError::Internal(format!("hash verification failed: {e}")))
}
