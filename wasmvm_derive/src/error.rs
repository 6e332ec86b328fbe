//! Derive macro for error enums.
//!
//! Generates `std::fmt::Display` and `std::error::Error` implementations
//! from per-variant `#[error("...")]` attributes. Field interpolation uses
//! `{0}`, `{1}` for tuple fields and `{name}` for struct fields.
//!
//! ```ignore
//! use wasmvm_derive::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum EngineError {
//!     #[error("division by zero")]
//!     DivisionByZero,
//!
//!     #[error("invalid opcode: {0:#04x}")]
//!     InvalidOpcode(u8),
//!
//!     #[error("out of bounds: offset {offset}, size {size}")]
//!     OutOfBounds { offset: u64, size: usize },
//! }
//! ```

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{parse_macro_input, Data, DeriveInput, Fields, Lit, Meta, Variant};

/// Derives `Display` and `Error` for an enum.
pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;

    let variants = match &input.data {
        Data::Enum(data) => &data.variants,
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "Error can only be derived for enums",
            ));
        }
    };

    let arms = variants
        .iter()
        .map(display_arm)
        .collect::<syn::Result<Vec<_>>>()?;

    Ok(quote! {
        impl ::std::fmt::Display for #name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {
                    #(#arms)*
                }
            }
        }

        impl ::std::error::Error for #name {}
    })
}

/// Builds the `Display` match arm for a single variant.
fn display_arm(variant: &Variant) -> syn::Result<proc_macro2::TokenStream> {
    let ident = &variant.ident;
    let message = error_message(variant)?;

    let arm = match &variant.fields {
        Fields::Unit => quote! {
            Self::#ident => write!(f, #message),
        },
        Fields::Unnamed(fields) => {
            let bindings: Vec<_> = (0..fields.unnamed.len())
                .map(|i| format_ident!("f{}", i))
                .collect();
            let message = rename_positional(&message, fields.unnamed.len());
            quote! {
                Self::#ident(#(#bindings),*) => write!(f, #message, #(#bindings = #bindings),*),
            }
        }
        Fields::Named(fields) => {
            let bindings: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
            quote! {
                Self::#ident { #(#bindings),* } => write!(f, #message, #(#bindings = #bindings),*),
            }
        }
    };

    Ok(arm)
}

/// Reads the display message from the variant's `#[error("...")]` attribute.
fn error_message(variant: &Variant) -> syn::Result<String> {
    for attr in &variant.attrs {
        if !attr.path().is_ident("error") {
            continue;
        }
        let Meta::List(list) = &attr.meta else {
            return Err(syn::Error::new_spanned(
                &attr.meta,
                "expected #[error(\"message\")]",
            ));
        };
        match syn::parse2::<Lit>(list.tokens.clone()) {
            Ok(Lit::Str(s)) => return Ok(s.value()),
            _ => {
                return Err(syn::Error::new_spanned(
                    &attr.meta,
                    "the #[error] message must be a string literal",
                ));
            }
        }
    }

    Err(syn::Error::new_spanned(
        variant,
        format!(
            "variant `{}` is missing its #[error(\"...\")] attribute",
            variant.ident
        ),
    ))
}

/// Rewrites positional format args `{0}`, `{1}` to the `{f0}`, `{f1}`
/// bindings introduced when destructuring a tuple variant. Indices are
/// replaced highest-first so `{1}` is not corrupted by rewriting `{0}`.
fn rename_positional(message: &str, field_count: usize) -> String {
    let mut out = message.to_string();
    for i in (0..field_count).rev() {
        out = out.replace(&format!("{{{}}}", i), &format!("{{f{}}}", i));
        out = out.replace(&format!("{{{}:", i), &format!("{{f{}:", i));
    }
    out
}
