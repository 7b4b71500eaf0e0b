//! Function wrapping, schema synthesis and tool dispatch.
//!
//! This crate provides:
//! - [`WrappedFunction`]: a callable with synthesized Input/Output schemas and
//!   a validated call entry point
//! - [`DescriptorCompiler`]: normalizes JSON Schema annotations into
//!   [`TypeDescriptor`]s
//! - [`Validator`]: collects every argument violation, with coercion and defaults
//! - [`ToolRegistry`] and [`DispatchSession`]: turn-based tool dispatch with a
//!   terminal `__return__` tool resolving a [`Completion`]
//! - [`Problem`]: RFC 9457 bodies for validation failures
//! - `#[function]`: attribute macro that turns a plain `fn` into a [`Callable`]

// Lets `#[function]` expansions refer to `::callkit_core` inside this crate.
extern crate self as callkit_core;

pub mod completion;
pub mod config;
pub mod descriptor;
pub mod docs;
pub mod error;
pub mod function;
pub mod problem;
pub mod registry;
pub mod schema;
pub mod signature;
pub mod validate;

pub use completion::{Completion, PendingCompletion};
pub use config::RegistryConfig;
pub use descriptor::{
    Annotation, Constraints, Definitions, DescriptorCompiler, Field, IntegerRange, Pattern,
    PrimitiveKind, RecordDescriptor, TypeDescriptor, TypeKind,
};
pub use error::{
    CallError, CompletionError, DispatchError, RegistryError, SchemaError, ValidationFailed,
};
pub use function::{Callable, FnCallable, WrappedFunction, to_output};
pub use problem::Problem;
pub use registry::{
    DispatchSession, FailureKind, RETURN_PARAM, RETURN_TOOL_NAME, SessionState, ToolDefinition,
    ToolFailure, ToolInvocation, ToolOutcome, ToolRegistry, ToolRegistryBuilder, ToolResult,
};
pub use schema::{FunctionSchemas, InputSchema, OutputSchema};
pub use signature::{FunctionDecl, ParamDecl, ParameterSpec};
pub use validate::{
    ArgumentError, Arguments, UnknownFields, ValidationError, ValidationErrorKind, Validator,
};

pub use callkit_macros::function;

// Re-exported for macro-generated code and callers building schemas by hand.
pub use anyhow;
pub use futures::future::BoxFuture;
pub use schemars;
pub use serde_json;
