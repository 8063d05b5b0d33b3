//! Common configuration types for clinic components.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default tracing filter when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "clinic_service=debug,tower_http=debug";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output for local development
    Text,
    /// One JSON object per line for log shippers
    Json,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing filter directive (`RUST_LOG` syntax)
    pub log_filter: String,
    /// Output format
    pub log_format: LogFormat,
}

impl ObservabilityConfig {
    /// Build from a variable map.
    ///
    /// `RUST_LOG` overrides the default filter, `LOG_FORMAT=json` switches to
    /// JSON output. Unknown formats fall back to text.
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let log_filter = vars
            .get("RUST_LOG")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let log_format = match vars.get("LOG_FORMAT").map(String::as_str) {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Self {
            log_filter,
            log_format,
        }
    }

    /// Build from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(&std::env::vars().collect())
    }
}
