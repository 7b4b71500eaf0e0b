//! Error types for schema building, calls, registries and dispatch.

use crate::registry::ToolResult;
use crate::validate::ValidationError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error raised while turning a declaration into schemas.
///
/// These are build-time failures: a function whose declaration produces one
/// of these is never wrapped, and no partial schema is kept.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// The annotation uses a shape the compiler cannot describe.
    #[error("unsupported type `{annotation}`: {reason}")]
    UnsupportedType { annotation: String, reason: String },

    /// Two parameters share a name.
    #[error("duplicate parameter `{0}`")]
    DuplicateParameter(String),

    /// A declared default could not be serialized.
    #[error("invalid default for parameter `{name}`: {reason}")]
    InvalidDefault { name: String, reason: String },

    /// A string pattern is not a valid regular expression.
    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A constraint was attached to a shape it cannot apply to.
    #[error("constraint `{constraint}` cannot apply to {shape}")]
    InapplicableConstraint {
        constraint: &'static str,
        shape: String,
    },

    /// A `$ref` points at a definition that does not exist.
    #[error("unresolved reference `{0}`")]
    UnresolvedReference(String),
}

impl SchemaError {
    pub(crate) fn unsupported(annotation: impl fmt::Display, reason: impl fmt::Display) -> Self {
        SchemaError::UnsupportedType {
            annotation: annotation.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Aggregated validation failure carrying every violation found.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{}", summarize(.errors))]
pub struct ValidationFailed {
    pub errors: Vec<ValidationError>,
}

impl ValidationFailed {
    pub fn new(errors: Vec<ValidationError>) -> Self {
        Self { errors }
    }

    /// Paths of all offending fields, in report order.
    pub fn paths(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.path.as_str()).collect()
    }
}

fn summarize(errors: &[ValidationError]) -> String {
    let noun = if errors.len() == 1 { "error" } else { "errors" };
    let details = errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    format!("{} validation {noun}: {details}", errors.len())
}

/// Error returned by [`WrappedFunction::call`](crate::WrappedFunction::call).
#[derive(Error, Debug)]
pub enum CallError {
    /// More positional arguments than declared parameters.
    #[error("too many arguments: expected at most {expected}, got {received}")]
    TooManyArguments { expected: usize, received: usize },

    /// The same parameter was supplied positionally and by keyword.
    #[error("multiple values for argument `{0}`")]
    DuplicateArgument(String),

    /// The arguments did not match the input schema.
    #[error(transparent)]
    ValidationFailed(#[from] ValidationFailed),

    /// The wrapped callable itself failed. The error is passed through as is.
    #[error(transparent)]
    Function(anyhow::Error),
}

impl CallError {
    /// The validation failure, if this is one.
    pub fn validation(&self) -> Option<&ValidationFailed> {
        match self {
            CallError::ValidationFailed(v) => Some(v),
            _ => None,
        }
    }
}

/// Error raised while building a [`ToolRegistry`](crate::ToolRegistry).
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("duplicate tool name: {0}")]
    DuplicateName(String),

    #[error("tool name {0} is reserved")]
    ReservedName(String),

    #[error("failed to build tool schema: {0}")]
    Schema(#[from] SchemaError),
}

/// Session-level dispatch failure.
///
/// Per-invocation problems are normally reported as
/// [`ToolResult`](crate::ToolResult) errors; these only surface when the
/// session is closed or runs in fail-fast mode.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("dispatch session has failed and accepts no further turns")]
    SessionFailed,

    #[error("tool not found: {name} (invocation {id})")]
    ToolNotFound {
        id: String,
        name: String,
        /// Results of the blocks dispatched earlier in the same turn.
        results: Vec<ToolResult>,
    },

    #[error("tool {name} failed (invocation {id}): {error:#}")]
    Execution {
        id: String,
        name: String,
        error: anyhow::Error,
        results: Vec<ToolResult>,
    },
}

impl DispatchError {
    /// Results produced before the turn stopped. Empty for
    /// [`DispatchError::SessionFailed`].
    pub fn partial_results(&self) -> &[ToolResult] {
        match self {
            Self::SessionFailed => &[],
            Self::ToolNotFound { results, .. } | Self::Execution { results, .. } => results,
        }
    }

    pub(crate) fn with_results(mut self, partial: Vec<ToolResult>) -> Self {
        if let Self::ToolNotFound { results, .. } | Self::Execution { results, .. } = &mut self {
            *results = partial;
        }
        self
    }
}

/// Error observed on a [`Completion`](crate::Completion).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompletionError {
    #[error("already completed")]
    AlreadyCompleted,

    #[error("timed out after {0:?} waiting for completion")]
    Timeout(Duration),

    #[error("completion failed: {0}")]
    Failed(String),

    #[error("session dropped before a result was returned")]
    Abandoned,
}
