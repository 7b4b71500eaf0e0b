//! Registry configuration.
//!
//! Precedence: defaults, then a JSON document, then environment variables
//! (`CALLKIT_UNKNOWN_FIELDS`, `CALLKIT_FAIL_FAST`).

use crate::validate::UnknownFields;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Settings applied to every dispatch session of a registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Policy for argument fields a tool does not declare.
    pub unknown_fields: UnknownFields,

    /// Fail the whole session on an unknown tool or a tool error instead of
    /// reporting it back as a result.
    pub fail_fast: bool,
}

impl RegistryConfig {
    /// Parse a JSON document. Missing keys take their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Invalid registry config JSON")
    }

    pub fn with_unknown_fields(mut self, mode: UnknownFields) -> Self {
        self.unknown_fields = mode;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Apply environment variable overrides. Unrecognized values are
    /// ignored with a warning.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_trimmed("CALLKIT_UNKNOWN_FIELDS") {
            match v.to_lowercase().as_str() {
                "ignore" => self.unknown_fields = UnknownFields::Ignore,
                "reject" => self.unknown_fields = UnknownFields::Reject,
                other => warn!(value = other, "ignoring invalid CALLKIT_UNKNOWN_FIELDS"),
            }
        }
        if let Some(v) = env_trimmed("CALLKIT_FAIL_FAST") {
            self.fail_fast = v.to_lowercase() == "true" || v == "1";
        }
        self
    }
}

/// Read an env var, trimmed, treating empty as unset.
fn env_trimmed(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
