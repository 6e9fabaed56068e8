//! Passphrase hashing and at-rest encryption of key material.
//!
//! The passphrase is hashed with Argon2id into an encoded string that also
//! fixes the parameters for recomputing the 32-byte wrap key. Key material
//! is sealed secretbox-style: 24 random nonce bytes followed by an
//! XChaCha20-Poly1305 ciphertext.

use argon2::{Algorithm as Argon2Algorithm, Argon2, Params as Argon2Params, Version as Argon2Version};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{KeyInit, XChaCha20Poly1305, XNonce};
use rand::RngCore;

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 24;
pub const WRAP_KEY_LEN: usize = 32;

const MEMORY_KIB: u32 = 64 * 1024;
const ITERATIONS: u32 = 3;
const PARALLELISM: u32 = 2;

#[derive(Debug, Eq, PartialEq)]
pub enum CryptoError {
    /// The encoded hash string is malformed.
    BadHash,
    /// Authenticated decryption failed.
    CryptoFailed,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoError::BadHash => write!(f, "invalid hash"),
            CryptoError::CryptoFailed => write!(f, "decryption error"),
        }
    }
}

impl std::error::Error for CryptoError {}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HashParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

/// Hash a passphrase into the encoded
/// `$argon2id$v=<ver>$m=<mem>,t=<iter>,p=<par>$<salt>$<key>` form.
pub fn hash_passphrase(passphrase: &[u8]) -> Result<String, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);

    let params = HashParams {
        memory_kib: MEMORY_KIB,
        iterations: ITERATIONS,
        parallelism: PARALLELISM,
    };
    let key = derive_key(passphrase, &salt, params)?;

    Ok(format!(
        "$argon2id$v={}$m={},t={},p={}${}${}",
        Argon2Version::V0x13 as u32,
        params.memory_kib,
        params.iterations,
        params.parallelism,
        STANDARD_NO_PAD.encode(salt),
        STANDARD_NO_PAD.encode(key),
    ))
}

/// Recompute the hash for `passphrase` under the encoded parameters and
/// compare in constant time.
pub fn verify_passphrase(encoded: &str, passphrase: &[u8]) -> bool {
    let Ok((params, key, salt)) = decode_hash(encoded) else {
        return false;
    };
    if key.len() != WRAP_KEY_LEN {
        return false;
    }
    let Ok(candidate) = derive_key(passphrase, &salt, params) else {
        return false;
    };
    constant_time_eq(&key, &candidate)
}

/// Split an encoded hash into its parameters, derived key, and salt.
pub fn decode_hash(encoded: &str) -> Result<(HashParams, Vec<u8>, Vec<u8>), CryptoError> {
    let parts: Vec<&str> = encoded.split('$').collect();
    if parts.len() != 6 || !parts[0].is_empty() || parts[1] != "argon2id" {
        return Err(CryptoError::BadHash);
    }

    let version: u32 = parts[2]
        .strip_prefix("v=")
        .and_then(|raw| raw.parse().ok())
        .ok_or(CryptoError::BadHash)?;
    if version != Argon2Version::V0x13 as u32 {
        return Err(CryptoError::BadHash);
    }

    let params = parse_params(parts[3]).ok_or(CryptoError::BadHash)?;
    let salt = STANDARD_NO_PAD
        .decode(parts[4])
        .map_err(|_| CryptoError::BadHash)?;
    let key = STANDARD_NO_PAD
        .decode(parts[5])
        .map_err(|_| CryptoError::BadHash)?;

    Ok((params, key, salt))
}

/// Seal `plain` under `key`: random 24-byte nonce followed by the
/// authenticated ciphertext.
pub fn encrypt(plain: &[u8], key: &[u8; WRAP_KEY_LEN]) -> Result<Vec<u8>, CryptoError> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let cipher = XChaCha20Poly1305::new(key.into());
    let sealed = cipher
        .encrypt(XNonce::from_slice(&nonce), plain)
        .map_err(|_| CryptoError::CryptoFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open a blob produced by [`encrypt`].
pub fn decrypt(blob: &[u8], key: &[u8; WRAP_KEY_LEN]) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < NONCE_LEN {
        return Err(CryptoError::CryptoFailed);
    }
    let (nonce, sealed) = blob.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(XNonce::from_slice(nonce), sealed)
        .map_err(|_| CryptoError::CryptoFailed)
}

fn derive_key(
    passphrase: &[u8],
    salt: &[u8],
    params: HashParams,
) -> Result<[u8; WRAP_KEY_LEN], CryptoError> {
    let argon_params = Argon2Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(WRAP_KEY_LEN),
    )
    .map_err(|_| CryptoError::BadHash)?;
    let argon2 = Argon2::new(Argon2Algorithm::Argon2id, Argon2Version::V0x13, argon_params);
    let mut out = [0u8; WRAP_KEY_LEN];
    argon2
        .hash_password_into(passphrase, salt, &mut out)
        .map_err(|_| CryptoError::BadHash)?;
    Ok(out)
}

fn parse_params(raw: &str) -> Option<HashParams> {
    let mut memory_kib = None;
    let mut iterations = None;
    let mut parallelism = None;
    for field in raw.split(',') {
        let (name, value) = field.split_once('=')?;
        let value: u32 = value.parse().ok()?;
        match name {
            "m" => memory_kib = Some(value),
            "t" => iterations = Some(value),
            "p" => parallelism = Some(value),
            _ => return None,
        }
    }
    Some(HashParams {
        memory_kib: memory_kib?,
        iterations: iterations?,
        parallelism: parallelism?,
    })
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
