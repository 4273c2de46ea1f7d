//! Derive macros for the ledger node.
//!
//! - `#[derive(BinaryCodec)]` implements the crate's `Encode` and `Decode` traits
//! - `#[derive(Error)]` implements `Display` and `std::error::Error` from `#[error("...")]`

mod binary_codec;
mod error;

use proc_macro::TokenStream;

/// Implements `Encode` and `Decode` for structs and enums.
///
/// Fields annotated with `#[binary_codec(skip)]` are left out of the encoding
/// and come back as `Default::default()` when decoded.
#[proc_macro_derive(BinaryCodec, attributes(binary_codec))]
pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    binary_codec::derive_binary_codec(input)
}

/// Implements `Display` and `Error` for error enums and structs.
#[proc_macro_derive(Error, attributes(error))]
pub fn derive_error(input: TokenStream) -> TokenStream {
    error::derive_error(input)
}
