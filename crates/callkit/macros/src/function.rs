//! Implementation of the #[function] proc macro.

use darling::FromMeta;
use darling::ast::NestedMeta;
use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::ext::IdentExt;
use syn::visit_mut::{self, VisitMut};
use syn::{Attribute, Expr, FnArg, Ident, ItemFn, LitStr, Pat, ReturnType, Type, parse2};

/// Parsed #[function(...)] attributes.
#[derive(Debug, Default, FromMeta)]
#[darling(default)]
struct FunctionAttr {
    /// Override the function name (defaults to the Rust name).
    name: Option<String>,
    /// Replaces the doc comment summary.
    description: Option<String>,
}

/// One parameter with its #[param(...)] settings.
struct Param {
    ident: Ident,
    ty: Type,
    default: Option<Expr>,
    description: Option<LitStr>,
    /// Builder method and bound, in declaration order.
    constraints: Vec<(Ident, TokenStream)>,
}

const FLOAT_BOUNDS: &[&str] = &[
    "minimum",
    "maximum",
    "exclusive_minimum",
    "exclusive_maximum",
];
const COUNT_BOUNDS: &[&str] = &["min_length", "max_length", "min_items", "max_items"];

/// Expand the #[function] attribute macro.
pub fn expand(attr: TokenStream, item: TokenStream) -> syn::Result<TokenStream> {
    let mut func: ItemFn = parse2(item)?;

    let function_attr = if attr.is_empty() {
        FunctionAttr::default()
    } else {
        let nested = NestedMeta::parse_meta_list(attr.clone())
            .map_err(|e| syn::Error::new_spanned(&attr, e))?;
        FunctionAttr::from_list(&nested).map_err(|e| syn::Error::new_spanned(&attr, e))?
    };

    if !func.sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &func.sig.generics,
            "#[function] does not support generic functions",
        ));
    }

    let params = func
        .sig
        .inputs
        .iter()
        .map(parse_param)
        .collect::<syn::Result<Vec<_>>>()?;
    strip_param_attributes(&mut func);

    let fn_ident = &func.sig.ident;
    let vis = &func.vis;
    let function_name = function_attr
        .name
        .unwrap_or_else(|| fn_ident.unraw().to_string());
    let struct_ident = format_ident!(
        "{}Function",
        to_pascal_case(&fn_ident.unraw().to_string())
    );

    let doc = collect_doc(&func.attrs);
    let doc_call = (!doc.is_empty()).then(|| quote!(.doc(#doc)));
    let description_call = function_attr
        .description
        .map(|text| quote!(.description(#text)));

    let param_decls = params.iter().map(param_decl);

    // A Result return is unwrapped: Ok feeds the output schema, Err fails the call.
    let (returns_call, propagate) = match &func.sig.output {
        ReturnType::Default => (None, None),
        ReturnType::Type(_, ty) => match extract_result_ok_type(ty) {
            Some(ok) => (Some(quote!(.returns::<#ok>())), Some(quote!(?))),
            None => (Some(quote!(.returns::<#ty>())), None),
        },
    };
    let await_call = func.sig.asyncness.map(|_| quote!(.await));

    let bindings = params.iter().map(|p| {
        let ident = &p.ident;
        let ty = &p.ty;
        let name = ident.unraw().to_string();
        quote!(let #ident: #ty = __callkit_args.take(#name)?;)
    });
    let arg_idents = params.iter().map(|p| &p.ident);
    let args_binding = if params.is_empty() {
        quote!(let _ = __callkit_args;)
    } else {
        quote!(let mut __callkit_args = __callkit_args;)
    };
    let struct_doc = format!("Auto-generated callable for [`{fn_ident}`].");

    let expanded = quote! {
        #func

        #[doc = #struct_doc]
        #[derive(Clone, Copy, Debug, Default)]
        #vis struct #struct_ident;

        impl ::callkit_core::Callable for #struct_ident {
            fn declaration(&self) -> ::callkit_core::FunctionDecl {
                ::callkit_core::FunctionDecl::new(#function_name)
                    #doc_call
                    #description_call
                    #(#param_decls)*
                    #returns_call
            }

            fn invoke(
                &self,
                __callkit_args: ::callkit_core::Arguments,
            ) -> ::callkit_core::BoxFuture<
                'static,
                ::callkit_core::anyhow::Result<::callkit_core::serde_json::Value>,
            > {
                Box::pin(async move {
                    #args_binding
                    #(#bindings)*
                    let output = #fn_ident(#(#arg_idents),*)#await_call #propagate;
                    ::callkit_core::to_output(&output)
                })
            }
        }
    };

    Ok(expanded)
}

fn parse_param(arg: &FnArg) -> syn::Result<Param> {
    let pat_type = match arg {
        FnArg::Typed(pat_type) => pat_type,
        FnArg::Receiver(receiver) => {
            return Err(syn::Error::new_spanned(
                receiver,
                "#[function] only supports free functions",
            ));
        }
    };

    let ident = match &*pat_type.pat {
        Pat::Ident(pat) if pat.by_ref.is_none() && pat.subpat.is_none() => pat.ident.clone(),
        other => {
            return Err(syn::Error::new_spanned(
                other,
                "parameters must be plain identifiers",
            ));
        }
    };

    if let Type::Reference(reference) = &*pat_type.ty {
        return Err(syn::Error::new_spanned(
            reference,
            "parameters must be owned types",
        ));
    }

    let mut param = Param {
        ident,
        ty: (*pat_type.ty).clone(),
        default: None,
        description: None,
        constraints: Vec::new(),
    };

    for attr in pat_type.attrs.iter().filter(|a| a.path().is_ident("param")) {
        attr.parse_nested_meta(|meta| {
            let Some(key) = meta.path.get_ident().map(ToString::to_string) else {
                return Err(meta.error("expected a parameter setting"));
            };
            match key.as_str() {
                "default" => {
                    param.default = Some(meta.value()?.parse()?);
                }
                "description" => {
                    param.description = Some(meta.value()?.parse()?);
                }
                "pattern" => {
                    let pattern: LitStr = meta.value()?.parse()?;
                    param
                        .constraints
                        .push((format_ident!("pattern"), quote!(#pattern)));
                }
                k if FLOAT_BOUNDS.contains(&k) => {
                    let bound: Expr = meta.value()?.parse()?;
                    param
                        .constraints
                        .push((format_ident!("{}", k), quote!((#bound) as f64)));
                }
                k if COUNT_BOUNDS.contains(&k) => {
                    let count: Expr = meta.value()?.parse()?;
                    param
                        .constraints
                        .push((format_ident!("{}", k), quote!(#count)));
                }
                _ => return Err(meta.error(format!("unknown param setting `{key}`"))),
            }
            Ok(())
        })?;
    }

    Ok(param)
}

fn param_decl(param: &Param) -> TokenStream {
    let name = param.ident.unraw().to_string();
    let ty = &param.ty;
    let default = param.default.as_ref().map(|e| quote!(.default_value(#e)));
    let description = param.description.as_ref().map(|d| quote!(.description(#d)));
    let constraints = param
        .constraints
        .iter()
        .map(|(method, value)| quote!(.#method(#value)));
    quote! {
        .param(
            ::callkit_core::ParamDecl::of::<#ty>(#name)
                #default
                #description
                #(#constraints)*
        )
    }
}

/// Join `///` lines, dropping the single leading space rustdoc inserts.
fn collect_doc(attrs: &[Attribute]) -> String {
    let mut docs = Vec::new();
    for attr in attrs {
        if attr.path().is_ident("doc")
            && let syn::Meta::NameValue(meta) = &attr.meta
            && let Expr::Lit(lit) = &meta.value
            && let syn::Lit::Str(s) = &lit.lit
        {
            let line = s.value();
            docs.push(line.strip_prefix(' ').unwrap_or(&line).to_string());
        }
    }
    docs.join("\n")
}

/// Remove #[param] attributes so the emitted function compiles.
fn strip_param_attributes(func: &mut ItemFn) {
    struct ParamAttributeStripper;

    impl VisitMut for ParamAttributeStripper {
        fn visit_fn_arg_mut(&mut self, arg: &mut FnArg) {
            if let FnArg::Typed(pat_type) = arg {
                pat_type.attrs.retain(|attr| !attr.path().is_ident("param"));
            }
            visit_mut::visit_fn_arg_mut(self, arg);
        }
    }

    ParamAttributeStripper.visit_signature_mut(&mut func.sig);
}

/// Convert snake_case to PascalCase.
fn to_pascal_case(s: &str) -> String {
    s.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Try to extract the Ok type from a Result<T, E> type.
fn extract_result_ok_type(ty: &Type) -> Option<Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let last_segment = type_path.path.segments.last()?;
    if last_segment.ident == "Result"
        && let syn::PathArguments::AngleBracketed(args) = &last_segment.arguments
        && let Some(syn::GenericArgument::Type(ok_type)) = args.args.first()
    {
        return Some(ok_type.clone());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use quote::quote;

    fn expand_ok(attr: TokenStream, item: TokenStream) -> String {
        match expand(attr, item) {
            Ok(tokens) => tokens.to_string(),
            Err(e) => panic!("expansion failed: {e}"),
        }
    }

    fn expand_err(attr: TokenStream, item: TokenStream) -> String {
        match expand(attr, item) {
            Ok(_) => panic!("expansion should fail"),
            Err(e) => e.to_string(),
        }
    }

    #[test]
    fn test_to_pascal_case() {
        assert_eq!(to_pascal_case("divide"), "Divide");
        assert_eq!(to_pascal_case("prime_factors"), "PrimeFactors");
        assert_eq!(to_pascal_case("__return__"), "Return");
    }

    #[test]
    fn test_generates_struct_and_params() {
        let out = expand_ok(
            quote!(),
            quote! {
                /// Divide two numbers.
                fn divide(a: f64, #[param(default = 1.0)] b: f64) -> f64 {
                    a / b
                }
            },
        );
        assert!(out.contains("struct DivideFunction"));
        assert!(out.contains("FunctionDecl :: new (\"divide\")"));
        assert!(out.contains(". doc (\"Divide two numbers.\")"));
        assert!(out.contains("ParamDecl :: of :: < f64 > (\"a\")"));
        assert!(out.contains(". default_value (1.0)"));
        assert!(out.contains(". returns :: < f64 > ()"));
        assert!(!out.contains("# [param"), "param attributes must be stripped: {out}");
    }

    #[test]
    fn test_name_and_description_override() {
        let attr = quote!(name = "calc", description = "Add X, Y, and Z");
        let out = expand_ok(attr, quote!(fn calculate(x: i64) -> i64 { x }));
        assert!(out.contains("FunctionDecl :: new (\"calc\")"));
        assert!(out.contains(". description (\"Add X, Y, and Z\")"));
        assert!(out.contains("struct CalculateFunction"));
    }

    #[test]
    fn test_result_return_is_unwrapped() {
        let out = expand_ok(
            quote!(),
            quote! {
                async fn lookup(key: String) -> anyhow::Result<Vec<String>> {
                    Ok(vec![key])
                }
            },
        );
        assert!(out.contains(". returns :: < Vec < String > > ()"));
        assert!(out.contains("lookup (key) . await ?"));
    }

    #[test]
    fn test_constraints_in_declaration_order() {
        let out = expand_ok(
            quote!(),
            quote! {
                fn tag(
                    #[param(min_length = 1, max_length = 8, pattern = "^[a-z]+$")] label: String,
                    #[param(minimum = 0, description = "Weight of the tag")] weight: u32,
                ) -> String {
                    label
                }
            },
        );
        let min = out.find(". min_length (1)").unwrap();
        let max = out.find(". max_length (8)").unwrap();
        let pattern = out.find(". pattern (\"^[a-z]+$\")").unwrap();
        assert!(min < max && max < pattern);
        assert!(out.contains(". minimum ((0) as f64)"));
        assert!(out.contains(". description (\"Weight of the tag\")"));
    }

    #[test]
    fn test_no_return_type_leaves_output_untyped() {
        let out = expand_ok(quote!(), quote!(fn ping() {}));
        assert!(!out.contains("returns"));
        assert!(out.contains("let _ = __callkit_args ;"));
    }

    #[test]
    fn test_rejects_receiver() {
        let msg = expand_err(quote!(), quote!(fn run(&self, x: i64) -> i64 { x }));
        assert!(msg.contains("only supports free functions"), "got: {msg}");
    }

    #[test]
    fn test_rejects_generics() {
        let msg = expand_err(quote!(), quote!(fn id<T>(x: T) -> T { x }));
        assert!(msg.contains("generic"), "got: {msg}");
    }

    #[test]
    fn test_rejects_borrowed_params() {
        let msg = expand_err(quote!(), quote!(fn shout(s: &str) -> String { s.to_uppercase() }));
        assert!(msg.contains("owned types"), "got: {msg}");
    }

    #[test]
    fn test_rejects_unknown_param_setting() {
        let msg = expand_err(
            quote!(),
            quote!(fn f(#[param(multiple_of = 2)] x: i64) -> i64 { x }),
        );
        assert!(msg.contains("unknown param setting `multiple_of`"), "got: {msg}");
    }
}
