//! Observability for the clinic service.
//!
//! Provides metrics definitions and log-safe correlation helpers.

pub mod metrics;

use sha2::{Digest, Sha256};

/// Hash a personal identifier (phone, email) for log correlation.
///
/// Returns the first 8 hex chars of its SHA-256. Enough to follow one
/// identifier through the logs, not enough to recover it.
pub fn hash_for_correlation(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(digest.get(..4).unwrap_or_default())
}
