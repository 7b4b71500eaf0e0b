//! Tool registry and turn-based dispatch.
//!
//! A [`ToolRegistry`] holds wrapped functions plus the terminal
//! [`RETURN_TOOL_NAME`] tool. Each conversation gets its own
//! [`DispatchSession`], which runs invocation blocks in order and resolves
//! the session's [`Completion`] when the terminal tool is called.

use crate::completion::{Completion, PendingCompletion};
use crate::config::RegistryConfig;
use crate::descriptor::Annotation;
use crate::error::{CallError, DispatchError, RegistryError, SchemaError, ValidationFailed};
use crate::function::{Callable, FnCallable, WrappedFunction};
use crate::signature::{FunctionDecl, ParamDecl};
use crate::validate::{Arguments, ValidationError};
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reserved name of the terminal tool.
pub const RETURN_TOOL_NAME: &str = "__return__";

/// Name of the terminal tool's single parameter.
pub const RETURN_PARAM: &str = "result";

const RETURN_TOOL_DOC: &str = "Returns structured output back to the user. \
Use this to end your response, but don't mention the existence of this function.";

/// One tool call issued by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolInvocation {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Why an invocation produced an error result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ToolNotFound,
    ValidationFailed,
    AlreadyCompleted,
    ExecutionFailed,
}

/// Error half of a [`ToolResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ValidationError>>,
}

/// Outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Success(Value),
    Error(ToolFailure),
}

/// Result block echoing the invocation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    #[serde(flatten)]
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(id: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            outcome: ToolOutcome::Success(value),
        }
    }

    pub fn failure(id: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outcome: ToolOutcome::Error(ToolFailure {
                kind,
                message: message.into(),
                errors: None,
            }),
        }
    }

    fn validation_failed(id: impl Into<String>, failed: ValidationFailed) -> Self {
        Self {
            id: id.into(),
            outcome: ToolOutcome::Error(ToolFailure {
                kind: FailureKind::ValidationFailed,
                message: failed.to_string(),
                errors: Some(failed.errors),
            }),
        }
    }

    fn already_completed(id: impl Into<String>) -> Self {
        Self::failure(id, FailureKind::AlreadyCompleted, "already completed")
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success(_))
    }

    /// The success value, if any.
    pub fn value(&self) -> Option<&Value> {
        match &self.outcome {
            ToolOutcome::Success(v) => Some(v),
            ToolOutcome::Error(_) => None,
        }
    }

    /// The failure, if any.
    pub fn failure_info(&self) -> Option<&ToolFailure> {
        match &self.outcome {
            ToolOutcome::Success(_) => None,
            ToolOutcome::Error(f) => Some(f),
        }
    }

    /// Kind of failure, if this is an error result.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure_info().map(|f| f.kind)
    }
}

/// Provider-neutral tool listing entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Immutable set of tools. Cheap to clone and shareable across threads.
#[derive(Clone)]
pub struct ToolRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    tools: IndexMap<String, WrappedFunction>,
    config: RegistryConfig,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.list_names())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl ToolRegistry {
    /// Create a new registry builder.
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    /// Tool names in registration order; the terminal tool is last.
    pub fn list_names(&self) -> Vec<&str> {
        self.inner.tools.keys().map(String::as_str).collect()
    }

    /// Get a tool by exact name.
    pub fn get(&self, name: &str) -> Option<&WrappedFunction> {
        self.inner.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.tools.contains_key(name)
    }

    /// Number of tools, including the terminal tool.
    pub fn len(&self) -> usize {
        self.inner.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tools.is_empty()
    }

    /// The synthetic terminal tool.
    pub fn return_tool(&self) -> Option<&WrappedFunction> {
        self.get(RETURN_TOOL_NAME)
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Listing of every tool for adapters to map onto provider formats.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.inner
            .tools
            .values()
            .map(|f| ToolDefinition {
                name: f.name().to_string(),
                description: f.description().to_string(),
                input_schema: f.input_schema().to_json(),
            })
            .collect()
    }

    /// Start a dispatch session with a fresh completion.
    pub fn session(&self) -> DispatchSession {
        DispatchSession {
            registry: self.clone(),
            state: SessionState::AwaitingTurn,
            pending: PendingCompletion::new(),
        }
    }
}

/// Builder for constructing a [`ToolRegistry`].
#[derive(Default)]
pub struct ToolRegistryBuilder {
    items: Vec<Result<WrappedFunction, SchemaError>>,
    result: Option<Annotation>,
    config: RegistryConfig,
}

impl ToolRegistryBuilder {
    /// Wrap and register a callable. Schema errors surface from
    /// [`finish`](Self::finish).
    pub fn register(mut self, callable: impl Callable) -> Self {
        self.items.push(WrappedFunction::wrap(callable));
        self
    }

    /// Register an already wrapped function.
    pub fn register_wrapped(mut self, function: WrappedFunction) -> Self {
        self.items.push(Ok(function));
        self
    }

    /// Type accepted by the terminal tool. Defaults to any value.
    pub fn returning<T: JsonSchema + ?Sized>(self) -> Self {
        self.returning_annotation(Annotation::of::<T>())
    }

    pub fn returning_annotation(mut self, annotation: Annotation) -> Self {
        self.result = Some(annotation);
        self
    }

    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the registry from registered tools.
    pub fn finish(self) -> Result<ToolRegistry, RegistryError> {
        let mut tools = IndexMap::new();
        for item in self.items {
            let function = item?;
            let name = function.name().to_string();
            if name == RETURN_TOOL_NAME {
                return Err(RegistryError::ReservedName(name));
            }
            if tools.contains_key(&name) {
                return Err(RegistryError::DuplicateName(name));
            }
            if function.description().is_empty() {
                warn!(tool = %name, "tool has no description");
            }
            tools.insert(name, function);
        }

        let result = self
            .result
            .unwrap_or_else(|| Annotation::from_schema("any", Value::Bool(true)));
        tools.insert(RETURN_TOOL_NAME.to_string(), return_tool(result)?);

        debug!(tools = tools.len(), "built tool registry");
        Ok(ToolRegistry {
            inner: Arc::new(RegistryInner {
                tools,
                config: self.config,
            }),
        })
    }
}

fn return_tool(result: Annotation) -> Result<WrappedFunction, SchemaError> {
    let decl = FunctionDecl::new(RETURN_TOOL_NAME)
        .doc(RETURN_TOOL_DOC)
        .param(
            ParamDecl::new(RETURN_PARAM, result).description("The value to return to the user."),
        );
    WrappedFunction::wrap(FnCallable::new(decl, |mut args: Arguments| async move {
        Ok(args.take::<Value>(RETURN_PARAM)?)
    }))
}

/// Lifecycle of a [`DispatchSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingTurn,
    Dispatching,
    Completed,
    Failed,
}

/// Per-conversation dispatcher. Owns the writer side of the completion.
#[derive(Debug)]
pub struct DispatchSession {
    registry: ToolRegistry,
    state: SessionState,
    pending: PendingCompletion,
}

impl DispatchSession {
    /// Reader handle for the result the terminal tool delivers.
    pub fn completion(&self) -> Completion {
        self.pending.completion()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run one turn of invocation blocks, strictly in order.
    ///
    /// Blocks after the terminal tool, and every block of a turn arriving
    /// after completion, get [`FailureKind::AlreadyCompleted`]. In fail-fast
    /// mode an unknown tool or a tool error fails the session and the
    /// completion, and is returned as a [`DispatchError`].
    pub async fn dispatch_turn(
        &mut self,
        invocations: Vec<ToolInvocation>,
    ) -> Result<Vec<ToolResult>, DispatchError> {
        match self.state {
            SessionState::Failed => return Err(DispatchError::SessionFailed),
            SessionState::Completed => {
                debug!(blocks = invocations.len(), "turn after completion");
                return Ok(invocations
                    .into_iter()
                    .map(|inv| ToolResult::already_completed(inv.id))
                    .collect());
            }
            SessionState::AwaitingTurn | SessionState::Dispatching => {}
        }

        self.transition(SessionState::Dispatching);
        let mut results = Vec::with_capacity(invocations.len());
        for invocation in invocations {
            if self.state == SessionState::Completed {
                results.push(ToolResult::already_completed(invocation.id));
                continue;
            }
            match self.dispatch_one(invocation).await {
                Ok(result) => results.push(result),
                Err(error) => {
                    self.fail(&error);
                    return Err(error.with_results(results));
                }
            }
        }
        if self.state == SessionState::Dispatching {
            self.transition(SessionState::AwaitingTurn);
        }
        Ok(results)
    }

    async fn dispatch_one(
        &mut self,
        invocation: ToolInvocation,
    ) -> Result<ToolResult, DispatchError> {
        let ToolInvocation {
            id,
            name,
            arguments,
        } = invocation;
        debug!(invocation = %id, tool = %name, "dispatching");
        let config = *self.registry.config();

        let Some(function) = self.registry.get(&name).cloned() else {
            if config.fail_fast {
                return Err(DispatchError::ToolNotFound {
                    id,
                    name,
                    results: Vec::new(),
                });
            }
            let message = format!("tool not found: {name}");
            return Ok(ToolResult::failure(id, FailureKind::ToolNotFound, message));
        };

        let args = match function.validate_value(config.unknown_fields, &arguments) {
            Ok(args) => args,
            Err(failed) => {
                debug!(
                    invocation = %id,
                    tool = %name,
                    errors = failed.errors.len(),
                    "invalid arguments"
                );
                return Ok(ToolResult::validation_failed(id, failed));
            }
        };

        match function.invoke(args).await {
            Ok(value) if name == RETURN_TOOL_NAME => {
                if self.pending.resolve(value).is_err() {
                    return Ok(ToolResult::already_completed(id));
                }
                self.transition(SessionState::Completed);
                Ok(ToolResult::success(id, Value::Null))
            }
            Ok(value) => Ok(ToolResult::success(id, value)),
            Err(CallError::Function(error)) if config.fail_fast => {
                Err(DispatchError::Execution {
                    id,
                    name,
                    error,
                    results: Vec::new(),
                })
            }
            Err(error) => Ok(ToolResult::failure(
                id,
                FailureKind::ExecutionFailed,
                format!("{error:#}"),
            )),
        }
    }

    fn fail(&mut self, error: &DispatchError) {
        warn!(error = %error, "dispatch session failed");
        self.transition(SessionState::Failed);
        // The completion may already be settled; nothing to report then.
        let _ = self.pending.fail(error.to_string());
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "session state");
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::to_output;
    use serde_json::json;

    fn echo() -> impl Callable {
        let decl = FunctionDecl::new("echo")
            .doc("Echo the text back.")
            .param(ParamDecl::of::<String>("text"))
            .returns::<String>();
        FnCallable::new(decl, |mut args: Arguments| async move {
            let text: String = args.take("text")?;
            to_output(&text)
        })
    }

    #[test]
    fn test_registry_builder() {
        let registry = ToolRegistry::builder().register(echo()).finish().unwrap();

        assert!(registry.contains("echo"));
        assert!(registry.contains(RETURN_TOOL_NAME));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.list_names(), vec!["echo", RETURN_TOOL_NAME]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = ToolRegistry::builder()
            .register(echo())
            .register(echo())
            .finish()
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(ref n) if n == "echo"));
    }

    #[test]
    fn test_reserved_name_rejected() {
        let decl = FunctionDecl::new(RETURN_TOOL_NAME);
        let err = ToolRegistry::builder()
            .register(FnCallable::new(decl, |_args| async { Ok(Value::Null) }))
            .finish()
            .unwrap_err();
        assert!(matches!(err, RegistryError::ReservedName(_)));
    }

    #[test]
    fn test_schema_errors_surface_on_finish() {
        let decl = FunctionDecl::new("pairs").param(ParamDecl::of::<(i32, i32)>("pair"));
        let err = ToolRegistry::builder()
            .register(FnCallable::new(decl, |_args| async { Ok(Value::Null) }))
            .finish()
            .unwrap_err();
        assert!(matches!(err, RegistryError::Schema(SchemaError::UnsupportedType { .. })));
    }

    #[test]
    fn test_tool_definitions() {
        let registry = ToolRegistry::builder()
            .register(echo())
            .returning::<Vec<String>>()
            .finish()
            .unwrap();
        let defs = registry.tool_definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "echo");
        assert_eq!(defs[0].description, "Echo the text back.");
        assert_eq!(defs[0].input_schema["required"], json!(["text"]));

        assert_eq!(defs[1].name, RETURN_TOOL_NAME);
        assert!(defs[1].description.starts_with("Returns structured output"));
        assert_eq!(
            defs[1].input_schema["properties"][RETURN_PARAM]["type"],
            "array"
        );
    }

    #[test]
    fn test_result_serialization() {
        let ok = ToolResult::success("a", json!(3));
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({"id": "a", "success": 3}));

        let err = ToolResult::failure("b", FailureKind::ToolNotFound, "tool not found: x");
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"id": "b", "error": {"kind": "tool_not_found", "message": "tool not found: x"}})
        );
    }

    #[tokio::test]
    async fn test_session_dispatch() {
        let registry = ToolRegistry::builder().register(echo()).finish().unwrap();
        let mut session = registry.session();
        assert_eq!(session.state(), SessionState::AwaitingTurn);

        let results = session
            .dispatch_turn(vec![ToolInvocation::new("1", "echo", json!({"text": "hi"}))])
            .await
            .unwrap();
        assert_eq!(results[0].value(), Some(&json!("hi")));
        assert_eq!(session.state(), SessionState::AwaitingTurn);
        assert!(session.completion().poll().is_none());
    }

    #[tokio::test]
    async fn test_terminal_resolves_completion() {
        let registry = ToolRegistry::builder()
            .returning::<i64>()
            .finish()
            .unwrap();
        let mut session = registry.session();
        let completion = session.completion();

        let results = session
            .dispatch_turn(vec![ToolInvocation::new(
                "r",
                RETURN_TOOL_NAME,
                json!({"result": "42"}),
            )])
            .await
            .unwrap();
        assert_eq!(results[0].value(), Some(&Value::Null));
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(completion.poll(), Some(Ok(json!(42))));
    }

    #[tokio::test]
    async fn test_fail_fast_keeps_earlier_results() {
        let registry = ToolRegistry::builder()
            .register(echo())
            .config(RegistryConfig::default().with_fail_fast(true))
            .finish()
            .unwrap();
        let mut session = registry.session();

        let err = session
            .dispatch_turn(vec![
                ToolInvocation::new("1", "echo", json!({"text": "hi"})),
                ToolInvocation::new("2", "missing", json!({})),
                ToolInvocation::new("3", "echo", json!({"text": "never"})),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::ToolNotFound { ref id, .. } if id == "2"));
        let partial = err.partial_results();
        assert_eq!(partial.len(), 1);
        assert_eq!(partial[0].id, "1");
        assert_eq!(partial[0].value(), Some(&json!("hi")));
        assert_eq!(session.state(), SessionState::Failed);
    }
}
