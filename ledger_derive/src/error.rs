//! `#[derive(Error)]`.
//!
//! Every variant (or the struct itself) declares its message with
//! `#[error("...")]`. Tuple fields are referenced as `{0}`, `{1}`; named fields
//! by name:
//!
//! ```ignore
//! #[derive(Debug, Error)]
//! pub enum BlockValidatorError {
//!     #[error("block at height {0} is already present")]
//!     BlockAlreadyPresent(u32),
//!     #[error("expected height {expected}, got {actual}")]
//!     HeightMismatch { expected: u32, actual: u32 },
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{ToTokens, format_ident, quote};
use syn::{Attribute, Data, DeriveInput, Fields, LitStr, parse_macro_input};

pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let body = match &input.data {
        Data::Enum(data) => {
            let arms = data
                .variants
                .iter()
                .map(|variant| {
                    let ident = &variant.ident;
                    let message = message(&variant.attrs, variant)?;
                    Ok(match &variant.fields {
                        Fields::Unit => quote! {
                            Self::#ident => write!(f, #message),
                        },
                        Fields::Unnamed(fields) => {
                            let format = positional_to_named(&message, fields.unnamed.len());
                            let patterns = (0..fields.unnamed.len()).map(|i| {
                                let binding = format_ident!("f{}", i);
                                if references(&format, &binding.to_string()) {
                                    quote! { #binding }
                                } else {
                                    quote! { _ }
                                }
                            });
                            let used: Vec<_> = (0..fields.unnamed.len())
                                .map(|i| format_ident!("f{}", i))
                                .filter(|binding| references(&format, &binding.to_string()))
                                .collect();
                            quote! {
                                Self::#ident(#(#patterns),*) => write!(f, #format, #(#used = #used),*),
                            }
                        }
                        Fields::Named(fields) => {
                            let used: Vec<_> = fields
                                .named
                                .iter()
                                .filter_map(|field| field.ident.as_ref())
                                .filter(|ident| references(&message, &ident.to_string()))
                                .collect();
                            quote! {
                                Self::#ident { #(#used,)* .. } => write!(f, #message, #(#used = #used),*),
                            }
                        }
                    })
                })
                .collect::<syn::Result<Vec<_>>>()?;

            quote! {
                match self {
                    #(#arms)*
                }
            }
        }
        Data::Struct(data) => {
            let message = message(&input.attrs, &input.ident)?;
            match &data.fields {
                Fields::Unit => quote! { write!(f, #message) },
                Fields::Named(fields) => {
                    let idents: Vec<_> = fields
                        .named
                        .iter()
                        .filter_map(|field| field.ident.as_ref())
                        .filter(|ident| references(&message, &ident.to_string()))
                        .collect();
                    quote! { write!(f, #message, #(#idents = self.#idents),*) }
                }
                Fields::Unnamed(fields) => {
                    let format = positional_to_named(&message, fields.unnamed.len());
                    let (bindings, indices): (Vec<_>, Vec<_>) = (0..fields.unnamed.len())
                        .map(|i| (format_ident!("f{}", i), syn::Index::from(i)))
                        .filter(|(binding, _)| references(&format, &binding.to_string()))
                        .unzip();
                    quote! { write!(f, #format, #(#bindings = self.#indices),*) }
                }
            }
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "Error cannot be derived for unions",
            ));
        }
    };

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                #body
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {}
    })
}

/// Reads the string literal out of `#[error("...")]`.
fn message<T: ToTokens>(attrs: &[Attribute], target: &T) -> syn::Result<String> {
    let attr = attrs
        .iter()
        .find(|attr| attr.path().is_ident("error"))
        .ok_or_else(|| {
            syn::Error::new_spanned(target, "missing #[error(\"...\")] display message")
        })?;

    let lit: LitStr = attr.parse_args().map_err(|_| {
        syn::Error::new_spanned(attr, "expected a string literal, e.g. #[error(\"bad height: {0}\")]")
    })?;
    Ok(lit.value())
}

/// Whether the format string interpolates `name`, with or without a format spec.
fn references(format: &str, name: &str) -> bool {
    format.contains(&format!("{{{name}}}")) || format.contains(&format!("{{{name}:"))
}

/// Rewrites `{0}` style references into `{f0}` so they match the generated bindings.
fn positional_to_named(format: &str, count: usize) -> String {
    (0..count).rev().fold(format.to_string(), |acc, i| {
        acc.replace(&format!("{{{i}}}"), &format!("{{f{i}}}"))
            .replace(&format!("{{{i}:"), &format!("{{f{i}:"))
    })
}
