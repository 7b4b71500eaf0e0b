//! RFC 9457 problem details for reporting call failures over HTTP.

use crate::error::{CallError, ValidationFailed};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Media type of a serialized [`Problem`].
pub const MEDIA_TYPE: &str = "application/problem+json";

const ABOUT_BLANK: &str = "about:blank";

fn is_about_blank(value: &str) -> bool {
    value == ABOUT_BLANK
}

fn about_blank() -> String {
    ABOUT_BLANK.to_string()
}

/// A problem details body. `type` is omitted when it is `about:blank`;
/// unknown members are kept as extensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(
        rename = "type",
        default = "about_blank",
        skip_serializing_if = "is_about_blank"
    )]
    pub type_uri: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,

    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

impl Default for Problem {
    fn default() -> Self {
        Self {
            type_uri: about_blank(),
            title: None,
            status: None,
            detail: None,
            instance: None,
            extensions: Map::new(),
        }
    }
}

impl Problem {
    pub fn new(status: u16, title: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// 422 body listing every validation error under `errors`.
    pub fn from_validation(failed: &ValidationFailed) -> Self {
        let errors =
            serde_json::to_value(&failed.errors).unwrap_or_else(|_| Value::Array(Vec::new()));
        Self::new(422, "Validation Failed")
            .with_detail(failed.to_string())
            .with_extension("errors", errors)
    }

    /// 500 body for failures that are not the caller's fault.
    pub fn application_error(detail: impl Into<String>) -> Self {
        Self::new(500, "Application Error").with_detail(detail)
    }

    /// Map a call error: argument problems are client errors, callable
    /// failures are application errors.
    pub fn from_call_error(error: &CallError) -> Self {
        match error {
            CallError::ValidationFailed(failed) => Self::from_validation(failed),
            CallError::TooManyArguments { .. } | CallError::DuplicateArgument(_) => {
                Self::new(400, "Bad Request").with_detail(error.to_string())
            }
            CallError::Function(e) => Self::application_error(format!("{e:#}")),
        }
    }

    /// Response status; 500 when unset.
    pub fn status_code(&self) -> u16 {
        self.status.unwrap_or(500)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}
