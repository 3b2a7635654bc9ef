//! Argon2id hashing of enrollment secrets.
//!
//! Both the password and the serialized embedding go through the same
//! memory-hard primitive with independent random salts. The stored form is a
//! PHC string, so the embedding can never be recovered or compared again.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{Output, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use zeroize::Zeroizing;

use crate::embedding::Embedding;
use crate::error::StorageError;

/// Hashes of one user's enrollment material, ready for the store.
///
/// Both strings are wiped on drop.
pub struct CredentialHashes {
    pub password_hash: Zeroizing<String>,
    pub embedding_hash: Zeroizing<String>,
}

impl CredentialHashes {
    pub fn derive(password: &str, embedding: &Embedding) -> Result<Self, StorageError> {
        let password_hash = hash_secret(password.as_bytes())?;
        let embedding_hash = hash_embedding(embedding)?;
        Ok(Self {
            password_hash,
            embedding_hash,
        })
    }
}

pub fn hash_secret(secret: &[u8]) -> Result<Zeroizing<String>, StorageError> {
    let salt = SaltString::generate(&mut OsRng);
    let mut hash = Argon2::default()
        .hash_password(secret, &salt)
        .map_err(|e| StorageError::Hashing(e.to_string()))?;
    let encoded = Zeroizing::new(hash.to_string());
    scrub_digest(&mut hash);
    Ok(encoded)
}

/// Overwrites the raw digest kept inside a parsed hash.
fn scrub_digest(hash: &mut PasswordHash<'_>) {
    let zeros = [0u8; Output::MAX_LENGTH];
    if let Some(digest) = hash.hash.as_mut() {
        if let Ok(blank) = Output::new(&zeros[..digest.len()]) {
            *digest = blank;
        }
    }
    std::hint::black_box(&*hash);
    hash.hash = None;
}

/// Upper bound of the postcard encoding of `embedding`: a varint length
/// prefix followed by the raw `f32` values.
fn encoded_len(embedding: &Embedding) -> usize {
    10 + embedding.dimension() * std::mem::size_of::<f32>()
}

pub fn hash_embedding(embedding: &Embedding) -> Result<Zeroizing<String>, StorageError> {
    // fixed capacity, serialization never reallocates
    let mut buf = Zeroizing::new(vec![0u8; encoded_len(embedding)]);
    let bytes = postcard::to_slice(embedding, &mut buf)
        .map_err(|e| StorageError::Hashing(format!("serializing embedding: {e}")))?;
    hash_secret(bytes)
}

/// Checks a secret against a stored PHC string.
pub fn verify_secret(secret: &[u8], hash: &str) -> Result<bool, StorageError> {
    let parsed = PasswordHash::new(hash).map_err(|e| StorageError::Hashing(e.to_string()))?;
    Ok(Argon2::default().verify_password(secret, &parsed).is_ok())
}
