//! Wrapped functions: a callable bundled with its schemas and call entry points.

use crate::descriptor::DescriptorCompiler;
use crate::error::{CallError, SchemaError, ValidationFailed};
use crate::schema::{self, FunctionSchemas, InputSchema, OutputSchema};
use crate::signature::{self, FunctionDecl, ParameterSpec};
use crate::validate::{Arguments, UnknownFields, ValidationError, ValidationErrorKind, Validator};
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Something that can be wrapped: it declares its signature and runs on
/// validated arguments.
///
/// The `#[function]` attribute implements this for free functions.
pub trait Callable: Send + Sync + 'static {
    /// Declaration describing name, documentation, parameters and return.
    fn declaration(&self) -> FunctionDecl;

    /// Run with arguments that already passed validation.
    fn invoke(&self, args: Arguments) -> BoxFuture<'static, anyhow::Result<Value>>;
}

/// A [`Callable`] built from a declaration and an async closure.
pub struct FnCallable<F> {
    decl: FunctionDecl,
    f: F,
}

impl<F, Fut> FnCallable<F>
where
    F: Fn(Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    pub fn new(decl: FunctionDecl, f: F) -> Self {
        Self { decl, f }
    }
}

impl<F, Fut> Callable for FnCallable<F>
where
    F: Fn(Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    fn declaration(&self) -> FunctionDecl {
        self.decl.clone()
    }

    fn invoke(&self, args: Arguments) -> BoxFuture<'static, anyhow::Result<Value>> {
        Box::pin((self.f)(args))
    }
}

/// Serialize a function's return value.
pub fn to_output<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// A callable plus its immutable description. Cheap to clone.
#[derive(Clone)]
pub struct WrappedFunction {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    description: String,
    params: Vec<ParameterSpec>,
    schemas: FunctionSchemas,
    callable: Box<dyn Callable>,
}

impl fmt::Debug for WrappedFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedFunction")
            .field("name", &self.inner.name)
            .field("params", &self.inner.params.len())
            .finish_non_exhaustive()
    }
}

impl WrappedFunction {
    /// Extract the signature and synthesize schemas. Fails without
    /// producing anything if any annotation cannot be described.
    pub fn wrap(callable: impl Callable) -> Result<Self, SchemaError> {
        let decl = callable.declaration();
        let mut compiler = DescriptorCompiler::new();
        let sig = signature::extract(&decl, &mut compiler)?;
        let schemas = schema::synthesize(
            &sig.name,
            &sig.summary,
            &sig.params,
            sig.output,
            compiler.into_definitions(),
        );
        debug!(
            function = %sig.name,
            params = sig.params.len(),
            definitions = schemas.input.definitions().len(),
            "wrapped function"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                name: sig.name,
                description: sig.summary,
                params: sig.params,
                schemas,
                callable: Box::new(callable),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Summary from the documentation; empty when undocumented.
    pub fn description(&self) -> &str {
        &self.inner.description
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.inner.params
    }

    pub fn input_schema(&self) -> &InputSchema {
        &self.inner.schemas.input
    }

    pub fn output_schema(&self) -> &OutputSchema {
        &self.inner.schemas.output
    }

    /// The exchange document (`title`, `description`, `$defs`).
    pub fn exchange_document(&self) -> &Value {
        self.inner.schemas.document()
    }

    /// Call with positional and keyword arguments, ignoring unknown keywords.
    pub async fn call(
        &self,
        positional: Vec<Value>,
        keyword: Map<String, Value>,
    ) -> Result<Value, CallError> {
        self.call_with(UnknownFields::Ignore, positional, keyword)
            .await
    }

    /// Call with keyword arguments only.
    pub async fn call_kwargs(&self, keyword: Map<String, Value>) -> Result<Value, CallError> {
        self.call(Vec::new(), keyword).await
    }

    /// Call with an explicit policy for unknown keywords.
    pub async fn call_with(
        &self,
        mode: UnknownFields,
        positional: Vec<Value>,
        keyword: Map<String, Value>,
    ) -> Result<Value, CallError> {
        let bound = self.bind(positional, keyword)?;
        let args = self.validate(mode, &bound)?;
        self.invoke(args).await
    }

    /// Validate a keyword mapping without calling.
    pub fn validate(
        &self,
        mode: UnknownFields,
        input: &Map<String, Value>,
    ) -> Result<Arguments, ValidationFailed> {
        Validator::new(self.input_schema()).mode(mode).validate(input)
    }

    /// Validate an arbitrary JSON value, which must be an object.
    pub(crate) fn validate_value(
        &self,
        mode: UnknownFields,
        input: &Value,
    ) -> Result<Arguments, ValidationFailed> {
        match input {
            Value::Object(map) => self.validate(mode, map),
            // Absent arguments on a parameterless call are fine.
            Value::Null => self.validate(mode, &Map::new()),
            _ => Err(ValidationFailed::new(vec![ValidationError::new(
                "",
                ValidationErrorKind::TypeMismatch,
                "arguments should be an object",
            )])),
        }
    }

    /// Run the callable on already validated arguments.
    pub async fn invoke(&self, args: Arguments) -> Result<Value, CallError> {
        debug!(function = %self.inner.name, "invoking function");
        self.inner
            .callable
            .invoke(args)
            .await
            .map_err(CallError::Function)
    }

    /// Call once per keyword mapping. Entries are independent; one failing
    /// does not stop the rest.
    pub async fn call_batch(
        &self,
        entries: impl IntoIterator<Item = Map<String, Value>>,
    ) -> Vec<Result<Value, CallError>> {
        let mut results = Vec::new();
        for entry in entries {
            results.push(self.call_kwargs(entry).await);
        }
        results
    }

    fn bind(
        &self,
        positional: Vec<Value>,
        mut keyword: Map<String, Value>,
    ) -> Result<Map<String, Value>, CallError> {
        let params = &self.inner.params;
        if positional.len() > params.len() {
            return Err(CallError::TooManyArguments {
                expected: params.len(),
                received: positional.len(),
            });
        }
        if positional.is_empty() {
            return Ok(keyword);
        }

        let mut bound = Map::new();
        for (param, value) in params.iter().zip(positional) {
            if keyword.contains_key(&param.name) {
                return Err(CallError::DuplicateArgument(param.name.clone()));
            }
            bound.insert(param.name.clone(), value);
        }
        bound.append(&mut keyword);
        Ok(bound)
    }
}
