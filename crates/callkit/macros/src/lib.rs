//! Proc macros for callkit.
//!
//! This crate provides the `#[function]` attribute macro, which turns a plain
//! `fn` into a `callkit_core::Callable`.

mod function;

use proc_macro::TokenStream;

/// Attribute macro to make a free function wrappable.
///
/// # Usage
///
/// ```ignore
/// use callkit_core::function;
///
/// /// Divide two numbers.
/// ///
/// /// # Arguments
/// ///
/// /// * `a` - The dividend.
/// /// * `b` - The divisor.
/// #[function]
/// fn divide(a: f64, #[param(default = 1.0, exclusive_minimum = 0)] b: f64) -> f64 {
///     a / b
/// }
/// ```
///
/// This generates a `DivideFunction` unit struct implementing `Callable`,
/// ready for `WrappedFunction::wrap(DivideFunction)`.
///
/// # Attributes
///
/// - `name`: Function name in schemas (defaults to the Rust name)
/// - `description`: Replaces the doc comment summary
///
/// Parameters accept `#[param(...)]` with `default`, `description`,
/// `minimum`, `maximum`, `exclusive_minimum`, `exclusive_maximum`,
/// `min_length`, `max_length`, `pattern`, `min_items` and `max_items`.
///
/// Functions may be sync or async. A `Result` return is unwrapped: the `Ok`
/// type becomes the output schema and the error fails the call.
#[proc_macro_attribute]
pub fn function(attr: TokenStream, item: TokenStream) -> TokenStream {
    function::expand(attr.into(), item.into())
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
