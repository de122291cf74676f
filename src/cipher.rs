//! Envelope cipher for credentials held at rest during the approval window.
//!
//! AES-256-GCM under a single process-wide key. Every [`EnvelopeCipher::seal`]
//! draws a fresh 96-bit nonce from the OS RNG; there is no API that accepts a
//! caller-supplied nonce.

use crate::errors::EshError;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64ct::{Base64, Encoding};

/// Key length in bytes (256 bits for AES-256)
pub const KEY_LENGTH: usize = 32;

/// Nonce length in bytes (96 bits for AES-GCM)
pub const NONCE_LENGTH: usize = 12;

/// Authentication tag length in bytes
pub const TAG_LENGTH: usize = 16;

/// Environment variable holding the hex-encoded key
pub const ENCRYPTION_KEY_ENV: &str = "ESH_ENCRYPTION_KEY";

/// Ciphertext, nonce and tag produced by one `seal` call.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedBlob {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub tag: Vec<u8>,
}

// Never print ciphertext material
impl std::fmt::Debug for SealedBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedBlob")
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

impl SealedBlob {
    /// Encode as (ciphertext, nonce, tag) base64 strings for storage columns.
    pub fn to_columns(&self) -> (String, String, String) {
        (
            Base64::encode_string(&self.ciphertext),
            Base64::encode_string(&self.nonce),
            Base64::encode_string(&self.tag),
        )
    }

    pub fn from_columns(ciphertext: &str, nonce: &str, tag: &str) -> Result<Self, EshError> {
        let decode = |s: &str| Base64::decode_vec(s).map_err(|_| EshError::Integrity);
        Ok(Self {
            ciphertext: decode(ciphertext)?,
            nonce: decode(nonce)?,
            tag: decode(tag)?,
        })
    }
}

#[derive(Clone)]
pub struct EnvelopeCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for EnvelopeCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EnvelopeCipher(..)")
    }
}

impl EnvelopeCipher {
    pub fn new(key: &[u8]) -> Result<Self, EshError> {
        if key.len() != KEY_LENGTH {
            return Err(EshError::Config(format!(
                "encryption key must be {} bytes, got {}",
                KEY_LENGTH,
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| EshError::Config(format!("invalid encryption key: {}", e)))?;
        Ok(Self { cipher })
    }

    /// Parse a 64-character hex key.
    pub fn from_hex(key_hex: &str) -> Result<Self, EshError> {
        let key = hex::decode(key_hex.trim())
            .map_err(|e| EshError::Config(format!("encryption key is not valid hex: {}", e)))?;
        Self::new(&key)
    }

    /// Load the key from the environment. Missing or malformed keys are fatal at startup.
    pub fn from_env(var: &str) -> Result<Self, EshError> {
        let value = std::env::var(var)
            .map_err(|_| EshError::Config(format!("{} is not set", var)))?;
        Self::from_hex(&value)
    }

    pub fn seal(&self, plaintext: &str) -> Result<SealedBlob, EshError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut output = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| EshError::Other("encryption failed".to_string()))?;

        // aes-gcm appends the tag to the ciphertext
        let tag = output.split_off(output.len() - TAG_LENGTH);

        Ok(SealedBlob {
            ciphertext: output,
            nonce: nonce.to_vec(),
            tag,
        })
    }

    pub fn unseal(&self, blob: &SealedBlob) -> Result<String, EshError> {
        if blob.nonce.len() != NONCE_LENGTH || blob.tag.len() != TAG_LENGTH {
            return Err(EshError::Integrity);
        }

        let mut combined = Vec::with_capacity(blob.ciphertext.len() + TAG_LENGTH);
        combined.extend_from_slice(&blob.ciphertext);
        combined.extend_from_slice(&blob.tag);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&blob.nonce), combined.as_ref())
            .map_err(|_| EshError::Integrity)?;

        String::from_utf8(plaintext).map_err(|_| EshError::Integrity)
    }
}
