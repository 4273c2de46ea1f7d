//! Deterministic binary codec shared by the wire format, storage and hashing.
//!
//! The same bytes that travel between nodes are the bytes that get hashed and
//! signed, so the layout below is part of the protocol:
//!
//! - integers: fixed width, little-endian
//! - `bool`: one byte, `0` or `1`
//! - `Vec<T>`, `String`, `Bytes`: `u32` length prefix, then the elements
//! - `Option<T>`: one tag byte (`0` = none, `1` = some), then the value
//! - `[u8; N]`: the `N` bytes back to back, no prefix
//! - derived enums: one discriminant byte, then the variant fields

use crate::types::bytes::Bytes;
use ledger_derive::Error;

/// Upper bound on any decoded length prefix.
pub const MAX_LEN: usize = 16 * 1024 * 1024;

/// Destination for encoded bytes. Buffers and hashers both implement it so
/// values can be hashed without an intermediate allocation.
pub trait EncodeSink {
    fn write(&mut self, bytes: &[u8]);
}

impl EncodeSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

impl EncodeSink for Bytes {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Sink that only counts, used to size the output buffer up front.
#[derive(Default)]
struct SizeCounter(usize);

impl EncodeSink for SizeCounter {
    fn write(&mut self, bytes: &[u8]) {
        self.0 += bytes.len();
    }
}

pub trait Encode {
    fn encode<S: EncodeSink>(&self, out: &mut S);

    /// Encodes into a freshly allocated buffer of exactly the right size.
    fn to_bytes(&self) -> Bytes {
        let mut counter = SizeCounter::default();
        self.encode(&mut counter);

        let mut out = Bytes::with_capacity(counter.0);
        self.encode(&mut out);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("invalid value")]
    InvalidValue,
    #[error("length prefix exceeds the allowed maximum")]
    LengthOverflow,
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
}

pub trait Decode: Sized {
    /// Decodes one value from the front of `input` and advances it.
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError>;

    /// Decodes a value that must span the whole of `data`.
    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut input = data;
        let value = Self::decode(&mut input)?;
        if !input.is_empty() {
            return Err(DecodeError::TrailingBytes(input.len()));
        }
        Ok(value)
    }
}

/// Splits `n` bytes off the front of `input`.
pub(crate) fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if input.len() < n {
        return Err(DecodeError::UnexpectedEof);
    }
    let (head, rest) = input.split_at(n);
    *input = rest;
    Ok(head)
}

/// Writes a collection length as `u32`.
pub(crate) fn encode_len<S: EncodeSink>(len: usize, out: &mut S) {
    // Lengths above MAX_LEN are never produced by this crate.
    (len as u32).encode(out);
}

pub(crate) fn decode_len(input: &mut &[u8]) -> Result<usize, DecodeError> {
    let len = u32::decode(input)? as usize;
    if len > MAX_LEN {
        return Err(DecodeError::LengthOverflow);
    }
    Ok(len)
}

macro_rules! impl_le_int {
    ($($t:ty),*) => {
        $(
            impl Encode for $t {
                fn encode<S: EncodeSink>(&self, out: &mut S) {
                    out.write(&self.to_le_bytes());
                }
            }

            impl Decode for $t {
                fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
                    const WIDTH: usize = std::mem::size_of::<$t>();
                    let mut buf = [0u8; WIDTH];
                    buf.copy_from_slice(take(input, WIDTH)?);
                    Ok(<$t>::from_le_bytes(buf))
                }
            }
        )*
    };
}

impl_le_int!(u8, u16, u32, u64, i32, i64);

impl Encode for bool {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        u8::from(*self).encode(out);
    }
}

impl Decode for bool {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        match u8::decode(input)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        encode_len(self.len(), out);
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = decode_len(input)?;
        // Every element takes at least one byte, so a prefix larger than the
        // remaining input cannot be honest.
        if len > input.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(T::decode(input)?);
        }
        Ok(items)
    }
}

impl Encode for String {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        encode_len(self.len(), out);
        out.write(self.as_bytes());
    }
}

impl Decode for String {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = decode_len(input)?;
        let raw = take(input, len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidValue)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        match self {
            None => 0u8.encode(out),
            Some(value) => {
                1u8.encode(out);
                value.encode(out);
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        match u8::decode(input)? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(input)?)),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

impl<const N: usize> Encode for [u8; N] {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(self);
    }
}

impl<const N: usize> Decode for [u8; N] {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(take(input, N)?);
        Ok(buf)
    }
}
