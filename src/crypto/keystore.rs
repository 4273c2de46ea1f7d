//! Validator key kept encrypted on disk.
//!
//! File layout: `magic (4) | version (1) | salt (16) | nonce (24) | ciphertext`.
//! The encryption key is derived from the passphrase with Argon2id and the
//! scalar is sealed with XChaCha20-Poly1305, so a wrong passphrase and a
//! tampered file fail the same way.

use crate::crypto::key_pair::PrivateKey;
use crate::info;
use argon2::Argon2;
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use chacha20poly1305::aead::{Aead, KeyInit};
use ledger_derive::Error;
use rand_core::{OsRng, RngCore};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use zeroize::Zeroizing;

const MAGIC: &[u8; 4] = b"LNKS";
const VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
const HEADER_LEN: usize = MAGIC.len() + 1 + SALT_LEN + NONCE_LEN;
/// 32-byte scalar plus the 16-byte Poly1305 tag.
const CIPHERTEXT_LEN: usize = 32 + 16;

#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("keystore i/o error: {0}")]
    Io(String),
    #[error("malformed keystore file: {0}")]
    Malformed(&'static str),
    #[error("unsupported keystore version {0}")]
    UnsupportedVersion(u8),
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("wrong passphrase or corrupted keystore")]
    Decryption,
    #[error("keystore does not contain a valid private key")]
    InvalidKey,
    #[error("cannot determine the home directory")]
    NoHomeDir,
}

impl From<std::io::Error> for KeystoreError {
    fn from(err: std::io::Error) -> Self {
        KeystoreError::Io(err.to_string())
    }
}

/// Location of one node's encrypted validator key.
pub struct Keystore {
    path: PathBuf,
}

impl Keystore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.ledger_node/<node_name>/validator.key`
    pub fn default_for(node_name: &str) -> Result<Self, KeystoreError> {
        let home = dirs::home_dir().ok_or(KeystoreError::NoHomeDir)?;
        Ok(Self::new(
            home.join(".ledger_node").join(node_name).join("validator.key"),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decrypts the stored key, or generates and stores a new one when the
    /// file does not exist yet.
    pub fn load_or_create(&self, passphrase: &[u8]) -> Result<PrivateKey, KeystoreError> {
        if self.path.exists() {
            info!("loading validator key from {}", self.path.display());
            return self.load(passphrase);
        }

        info!("no validator key at {}, generating one", self.path.display());
        let key = PrivateKey::new();
        self.store(&key, passphrase)?;
        Ok(key)
    }

    pub fn store(&self, key: &PrivateKey, passphrase: &[u8]) -> Result<(), KeystoreError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let cipher = cipher_for(passphrase, &salt)?;
        let scalar = key.to_bytes();
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), scalar.as_slice())
            .map_err(|_| KeystoreError::Decryption)?;

        let mut file = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        file.extend_from_slice(MAGIC);
        file.push(VERSION);
        file.extend_from_slice(&salt);
        file.extend_from_slice(&nonce);
        file.extend_from_slice(&ciphertext);

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        // Owner-only temp file in the same directory, renamed over the target.
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&file)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| KeystoreError::Io(e.error.to_string()))?;
        Ok(())
    }

    pub fn load(&self, passphrase: &[u8]) -> Result<PrivateKey, KeystoreError> {
        let file = fs::read(&self.path)?;
        if file.len() != HEADER_LEN + CIPHERTEXT_LEN {
            return Err(KeystoreError::Malformed("unexpected file length"));
        }
        let (magic, rest) = file.split_at(MAGIC.len());
        if magic != MAGIC {
            return Err(KeystoreError::Malformed("bad magic"));
        }
        if rest[0] != VERSION {
            return Err(KeystoreError::UnsupportedVersion(rest[0]));
        }
        let (salt, rest) = rest[1..].split_at(SALT_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let cipher = cipher_for(passphrase, salt)?;
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(XNonce::from_slice(nonce), ciphertext)
                .map_err(|_| KeystoreError::Decryption)?,
        );

        let mut scalar = Zeroizing::new([0u8; 32]);
        if plaintext.len() != scalar.len() {
            return Err(KeystoreError::InvalidKey);
        }
        scalar.copy_from_slice(&plaintext);
        PrivateKey::from_bytes(&scalar).map_err(|_| KeystoreError::InvalidKey)
    }
}

fn cipher_for(passphrase: &[u8], salt: &[u8]) -> Result<XChaCha20Poly1305, KeystoreError> {
    let mut key = Zeroizing::new([0u8; 32]);
    Argon2::default()
        .hash_password_into(passphrase, salt, key.as_mut_slice())
        .map_err(|e| KeystoreError::KeyDerivation(e.to_string()))?;
    Ok(XChaCha20Poly1305::new(Key::from_slice(key.as_slice())))
}
