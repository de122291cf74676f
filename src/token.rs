//! API token minting.
//!
//! A minted token has two independent derived forms: a SHA-256 lookup digest
//! used as an equality index, and an Argon2id verification hash that proves
//! possession. Neither can be turned back into the plaintext.

use crate::errors::EshError;
use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Prefix that marks a string as an esh API token in logs and config files.
pub const TOKEN_PREFIX: &str = "esh_";

/// Random bytes behind every token.
const TOKEN_BYTES: usize = 32;

/// Output of [`mint`]. The plaintext lives only in this struct and in the sealed blob.
pub struct MintedToken {
    pub plaintext: String,
    pub lookup_digest: String,
    pub verification_hash: String,
}

impl std::fmt::Debug for MintedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MintedToken")
            .field("lookup_digest", &self.lookup_digest)
            .finish_non_exhaustive()
    }
}

pub fn mint() -> Result<MintedToken, EshError> {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let plaintext = format!("{}{}", TOKEN_PREFIX, Base64UrlUnpadded::encode_string(&bytes));

    let lookup_digest = lookup_digest(&plaintext);
    let verification_hash = verification_hash(&plaintext)?;

    Ok(MintedToken {
        plaintext,
        lookup_digest,
        verification_hash,
    })
}

/// Deterministic hex SHA-256 of the token, used for indexed lookup.
pub fn lookup_digest(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hex::encode(hasher.finalize())
}

/// Salted Argon2id hash of the token in PHC string format.
pub fn verification_hash(plaintext: &str) -> Result<String, EshError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| EshError::Other(format!("Token hashing failed: {}", e)))
}

pub fn verify(plaintext: &str, verification_hash: &str) -> Result<bool, EshError> {
    let parsed = PasswordHash::new(verification_hash)
        .map_err(|e| EshError::Other(format!("Invalid verification hash: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(plaintext.as_bytes(), &parsed)
        .is_ok())
}
