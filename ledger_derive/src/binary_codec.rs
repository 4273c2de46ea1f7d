//! `#[derive(BinaryCodec)]`.
//!
//! Fields are written in declaration order; enums are prefixed with a one byte
//! discriminant. The generated code targets `crate::types::encoding`, so the
//! macro is only usable from inside the `ledger_node` crate.
//!
//! ```ignore
//! #[derive(BinaryCodec)]
//! pub struct Transaction {
//!     data: Bytes,
//!     from: Option<PublicKey>,
//!     signature: Option<Signature>,
//!     #[binary_codec(skip)]
//!     first_seen: i64,
//! }
//! ```
//!
//! Skipped fields must implement `Default`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{Data, DataEnum, DeriveInput, Field, Fields, parse_macro_input};

pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let (encode_body, decode_body) = match &input.data {
        Data::Struct(data) => struct_bodies(&data.fields)?,
        Data::Enum(data) => enum_bodies(data)?,
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "BinaryCodec cannot be derived for unions",
            ));
        }
    };

    Ok(quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                #encode_body
            }
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn decode(input: &mut &[u8]) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                #decode_body
            }
        }
    })
}

/// Returns true when the field carries `#[binary_codec(skip)]`.
fn is_skipped(field: &Field) -> syn::Result<bool> {
    let mut skip = false;
    for attr in &field.attrs {
        if !attr.path().is_ident("binary_codec") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                skip = true;
                Ok(())
            } else {
                Err(meta.error("unknown binary_codec option, expected `skip`"))
            }
        })?;
    }
    Ok(skip)
}

fn struct_bodies(fields: &Fields) -> syn::Result<(TokenStream2, TokenStream2)> {
    match fields {
        Fields::Named(named) => {
            let mut encode = Vec::new();
            let mut decode = Vec::new();
            for field in &named.named {
                let ident = &field.ident;
                if is_skipped(field)? {
                    decode.push(quote! { #ident: ::std::default::Default::default(), });
                } else {
                    encode.push(quote! {
                        crate::types::encoding::Encode::encode(&self.#ident, out);
                    });
                    decode.push(quote! {
                        #ident: crate::types::encoding::Decode::decode(input)?,
                    });
                }
            }
            Ok((quote! { #(#encode)* }, quote! { Ok(Self { #(#decode)* }) }))
        }
        Fields::Unnamed(unnamed) => {
            let mut encode = Vec::new();
            let mut decode = Vec::new();
            for (i, field) in unnamed.unnamed.iter().enumerate() {
                let index = syn::Index::from(i);
                if is_skipped(field)? {
                    decode.push(quote! { ::std::default::Default::default(), });
                } else {
                    encode.push(quote! {
                        crate::types::encoding::Encode::encode(&self.#index, out);
                    });
                    decode.push(quote! { crate::types::encoding::Decode::decode(input)?, });
                }
            }
            Ok((quote! { #(#encode)* }, quote! { Ok(Self( #(#decode)* )) }))
        }
        Fields::Unit => Ok((quote! {}, quote! { Ok(Self) })),
    }
}

fn enum_bodies(data: &DataEnum) -> syn::Result<(TokenStream2, TokenStream2)> {
    let tags = discriminants(data)?;
    let mut encode_arms = Vec::new();
    let mut decode_arms = Vec::new();

    for (variant, tag) in data.variants.iter().zip(tags) {
        let ident = &variant.ident;
        match &variant.fields {
            Fields::Unit => {
                encode_arms.push(quote! {
                    Self::#ident => crate::types::encoding::Encode::encode(&#tag, out),
                });
                decode_arms.push(quote! { #tag => Ok(Self::#ident), });
            }
            Fields::Unnamed(fields) => {
                let bindings: Vec<_> = (0..fields.unnamed.len())
                    .map(|i| format_ident!("f{}", i))
                    .collect();
                let decodes = bindings
                    .iter()
                    .map(|_| quote! { crate::types::encoding::Decode::decode(input)?, });
                encode_arms.push(quote! {
                    Self::#ident(#(#bindings),*) => {
                        crate::types::encoding::Encode::encode(&#tag, out);
                        #(crate::types::encoding::Encode::encode(#bindings, out);)*
                    }
                });
                decode_arms.push(quote! { #tag => Ok(Self::#ident(#(#decodes)*)), });
            }
            Fields::Named(fields) => {
                let bindings: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
                encode_arms.push(quote! {
                    Self::#ident { #(#bindings),* } => {
                        crate::types::encoding::Encode::encode(&#tag, out);
                        #(crate::types::encoding::Encode::encode(#bindings, out);)*
                    }
                });
                decode_arms.push(quote! {
                    #tag => Ok(Self::#ident {
                        #(#bindings: crate::types::encoding::Decode::decode(input)?,)*
                    }),
                });
            }
        }
    }

    let encode = quote! {
        match self {
            #(#encode_arms)*
        }
    };
    let decode = quote! {
        let tag: u8 = crate::types::encoding::Decode::decode(input)?;
        match tag {
            #(#decode_arms)*
            _ => Err(crate::types::encoding::DecodeError::InvalidValue),
        }
    };
    Ok((encode, decode))
}

/// Resolves the one byte tag of every variant, honouring explicit `= N` values
/// and counting up from the previous tag otherwise.
fn discriminants(data: &DataEnum) -> syn::Result<Vec<u8>> {
    let mut tags = Vec::with_capacity(data.variants.len());
    let mut next: u16 = 0;

    for variant in &data.variants {
        let tag = match &variant.discriminant {
            Some((_, expr)) => literal_tag(expr)?,
            None => u8::try_from(next).map_err(|_| {
                syn::Error::new_spanned(variant, "BinaryCodec enums support at most 256 variants")
            })?,
        };
        tags.push(tag);
        next = u16::from(tag) + 1;
    }

    Ok(tags)
}

fn literal_tag(expr: &syn::Expr) -> syn::Result<u8> {
    if let syn::Expr::Lit(syn::ExprLit {
        lit: syn::Lit::Int(int),
        ..
    }) = expr
    {
        return int.base10_parse::<u8>();
    }
    Err(syn::Error::new_spanned(
        expr,
        "BinaryCodec discriminants must be integer literals that fit in a u8",
    ))
}
