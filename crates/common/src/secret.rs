//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports types from the [`secrecy`] crate. Use these for every value
//! that must never reach a log line: passwords, one-time passcodes, signing
//! key seeds and notifier API keys.
//!
//! `SecretBox<T>` and `SecretString` implement `Debug` with redaction, so a
//! struct that derives `Debug` and holds a secret is safe to log with `{:?}`.
//! Secrets are zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::SecretString;
//! use secrecy::ExposeSecret;
//!
//! #[derive(Debug)]
//! struct OtpVerification {
//!     identifier: String,
//!     code: SecretString,
//! }
//!
//! let req = OtpVerification {
//!     identifier: "+15550100".to_string(),
//!     code: SecretString::from("123456"),
//! };
//!
//! // The code is redacted
//! println!("{:?}", req);
//!
//! // Reading the value requires an explicit call
//! let code: &str = req.code.expose_secret();
//! ```
//!
//! # Serde Integration
//!
//! Secrets deserialize straight from request bodies:
//!
//! ```rust
//! use serde::Deserialize;
//! use common::secret::SecretString;
//!
//! #[derive(Debug, Deserialize)]
//! struct PasswordLogin {
//!     email: String,
//!     password: SecretString,
//! }
//!
//! let json = r#"{"email": "admin@clinic.test", "password": "correct horse"}"#;
//! let login: PasswordLogin = serde_json::from_str(json).unwrap();
//! println!("{:?}", login);
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("482913");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("482913"));
    }

    #[test]
    fn test_expose_secret_returns_inner_value() {
        let secret = SecretString::from("password123");
        assert_eq!(secret.expose_secret(), "password123");
    }

    #[test]
    fn test_deserialize_keeps_value_hidden() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct Login {
            email: String,
            password: SecretString,
        }

        let json = r#"{"email": "doc@clinic.test", "password": "my-secret-value"}"#;
        let login: Login = serde_json::from_str(json).expect("deserialize");

        assert_eq!(login.password.expose_secret(), "my-secret-value");

        let debug = format!("{login:?}");
        assert!(!debug.contains("my-secret-value"));
        assert!(debug.contains("REDACTED"));
    }
}
