//! ECDSA key pairs on secp256k1.

use crate::types::address::Address;
use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use crate::types::hash::Hash;
use hex::FromHex;
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use ledger_derive::{BinaryCodec, Error};
use rand_core::OsRng;
use std::fmt;
use zeroize::Zeroizing;

/// Length of a compressed SEC1 public key.
pub const PUBLIC_KEY_LEN: usize = 33;

/// Length of a fixed-size `r || s` signature.
pub const SIGNATURE_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("signing failed: {0}")]
    SigningFailed(String),
    #[error("invalid private key bytes")]
    InvalidPrivateKey,
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
}

/// Signing key. Never encoded or sent over the wire.
#[derive(Clone)]
pub struct PrivateKey {
    key: SigningKey,
}

/// Verifying key together with its compressed encoding and derived address.
#[derive(Clone)]
pub struct PublicKey {
    key: VerifyingKey,
    compressed: [u8; PUBLIC_KEY_LEN],
    address: Address,
}

/// ECDSA signature in fixed 64-byte form.
#[derive(Clone, Copy, PartialEq, Eq, BinaryCodec)]
pub struct Signature(pub [u8; SIGNATURE_LEN]);

/// Creates a fresh key pair from the operating system's CSPRNG.
pub fn generate_key_pair() -> (PrivateKey, PublicKey) {
    let private = PrivateKey::new();
    let public = private.public_key();
    (private, public)
}

impl PrivateKey {
    /// Generates a random key. Panics only if the OS random source fails.
    pub fn new() -> Self {
        Self {
            key: SigningKey::random(&mut OsRng),
        }
    }

    /// Rebuilds a key from its 32-byte scalar; rejects zero and out-of-range values.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        SigningKey::from_slice(bytes)
            .map(|key| Self { key })
            .map_err(|_| CryptoError::InvalidPrivateKey)
    }

    /// Raw scalar bytes, wiped from memory when dropped.
    pub(crate) fn to_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.key.to_bytes().into())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_verifying_key(*self.key.verifying_key())
    }

    /// Signs SHA-256 of `data` and returns the signature in `r || s` form.
    pub fn sign(&self, data: &[u8]) -> Result<Signature, CryptoError> {
        let signature: EcdsaSignature = self
            .key
            .try_sign(data)
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;

        let mut out = [0u8; SIGNATURE_LEN];
        out.copy_from_slice(&signature.to_bytes());
        Ok(Signature(out))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({})", self.public_key().address())
    }
}

impl PublicKey {
    fn from_verifying_key(key: VerifyingKey) -> Self {
        let mut compressed = [0u8; PUBLIC_KEY_LEN];
        compressed.copy_from_slice(key.as_affine().to_encoded_point(true).as_bytes());
        let address = Address::from_digest(&Hash::digest(&compressed).0);

        Self {
            key,
            compressed,
            address,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.compressed
    }

    /// Lowercase hex of the compressed key, as accepted by [`PublicKey::from_hex`].
    pub fn to_hex(&self) -> String {
        hex::encode(self.compressed)
    }

    /// Parses a 33-byte compressed SEC1 key from hex. A leading `0x` is allowed.
    pub fn from_hex(input: &str) -> Result<Self, CryptoError> {
        let trimmed = input.trim();
        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = <[u8; PUBLIC_KEY_LEN]>::from_hex(digits)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        let key = VerifyingKey::from_sec1_bytes(&bytes)
            .map_err(|_| CryptoError::InvalidPublicKey("not a curve point".into()))?;
        Ok(Self::from_verifying_key(key))
    }

    /// Checks `signature` over `data`. Malformed signatures simply fail.
    pub fn verify(&self, data: &[u8], signature: &Signature) -> bool {
        match EcdsaSignature::from_slice(&signature.0) {
            Ok(signature) => self.key.verify(data, &signature).is_ok(),
            Err(_) => false,
        }
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.compressed == other.compressed
    }
}

impl Eq for PublicKey {}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.address)
    }
}

impl Encode for PublicKey {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.compressed.encode(out);
    }
}

impl Decode for PublicKey {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let compressed = <[u8; PUBLIC_KEY_LEN]>::decode(input)?;
        let key =
            VerifyingKey::from_sec1_bytes(&compressed).map_err(|_| DecodeError::InvalidValue)?;
        Ok(Self::from_verifying_key(key))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(")?;
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}
