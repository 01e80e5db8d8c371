//! Record sealing for the session vault, built on `ring`.
//!
//! - **Sealing**: AES-256-GCM with a fresh random 96-bit nonce per write.
//!   The row key is passed as associated data, so a ciphertext copied onto
//!   another row no longer opens.
//! - **Key derivation**: PBKDF2-HMAC-SHA256, used by the file keychain to
//!   wrap the master key.
//! - **Random generation**: bytes from the system CSPRNG.

use ring::aead::{
    self, Aad, BoundKey, NONCE_LEN, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey,
};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{Result, VaultError};

/// Length of the AES-256-GCM key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the AES-256-GCM nonce in bytes.
pub const NONCE_LEN_BYTES: usize = NONCE_LEN;

/// Length of the PBKDF2 salt in bytes.
pub const SALT_LEN: usize = 32;

/// PBKDF2 rounds used when wrapping the master key.
const PBKDF2_ITERATIONS: u32 = 210_000;

static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

static AEAD_ALG: &aead::Algorithm = &aead::AES_256_GCM;

// ---------------------------------------------------------------------------
// Nonce handling
// ---------------------------------------------------------------------------

/// Yields its nonce once; `ring` binds one of these to each key it builds.
struct OneShotNonce(Option<[u8; NONCE_LEN_BYTES]>);

impl NonceSequence for OneShotNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

fn check_key(key: &[u8]) -> std::result::Result<(), String> {
    if key.len() == KEY_LEN {
        Ok(())
    } else {
        Err(format!("key must be {KEY_LEN} bytes, got {}", key.len()))
    }
}

// ---------------------------------------------------------------------------
// Sealing
// ---------------------------------------------------------------------------

/// Seal `plaintext` under `key`, authenticating `associated` alongside it.
///
/// Returns `(nonce, ciphertext || tag)`.
///
/// # Errors
///
/// Returns [`VaultError::EncryptionFailed`] on a bad key length or a `ring`
/// failure.
pub fn seal(
    plaintext: &[u8],
    associated: &[u8],
    key: &[u8],
) -> Result<([u8; NONCE_LEN_BYTES], Vec<u8>)> {
    check_key(key).map_err(|reason| VaultError::EncryptionFailed { reason })?;

    let mut nonce = [0u8; NONCE_LEN_BYTES];
    SystemRandom::new()
        .fill(&mut nonce)
        .map_err(|_| VaultError::EncryptionFailed {
            reason: "nonce generation failed".into(),
        })?;

    let unbound = UnboundKey::new(AEAD_ALG, key).map_err(|_| VaultError::EncryptionFailed {
        reason: "invalid AES-256-GCM key".into(),
    })?;
    let mut sealing_key = SealingKey::new(unbound, OneShotNonce(Some(nonce)));

    let mut in_out = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(Aad::from(associated), &mut in_out)
        .map_err(|_| VaultError::EncryptionFailed {
            reason: "seal_in_place failed".into(),
        })?;

    tracing::trace!(
        plaintext_len = plaintext.len(),
        sealed_len = in_out.len(),
        "sealed record"
    );

    Ok((nonce, in_out))
}

/// Open a record sealed by [`seal`] with the same `associated` data.
///
/// # Errors
///
/// Returns [`VaultError::DecryptionFailed`] if the key, nonce, associated
/// data or ciphertext do not match.
pub fn open(
    nonce: &[u8; NONCE_LEN_BYTES],
    sealed: &[u8],
    associated: &[u8],
    key: &[u8],
) -> Result<Vec<u8>> {
    check_key(key).map_err(|reason| VaultError::DecryptionFailed { reason })?;

    let unbound = UnboundKey::new(AEAD_ALG, key).map_err(|_| VaultError::DecryptionFailed {
        reason: "invalid AES-256-GCM key".into(),
    })?;
    let mut opening_key = OpeningKey::new(unbound, OneShotNonce(Some(*nonce)));

    let mut in_out = sealed.to_vec();
    let plaintext = opening_key
        .open_in_place(Aad::from(associated), &mut in_out)
        .map_err(|_| VaultError::DecryptionFailed {
            reason: "authentication tag mismatch".into(),
        })?;

    Ok(plaintext.to_vec())
}

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

/// Derive a 256-bit wrapping key from `material` and `salt`.
pub fn derive_key(material: &[u8], salt: &[u8]) -> [u8; KEY_LEN] {
    let mut out = [0u8; KEY_LEN];
    let rounds = std::num::NonZeroU32::new(PBKDF2_ITERATIONS).unwrap_or(std::num::NonZeroU32::MIN);
    pbkdf2::derive(PBKDF2_ALG, rounds, salt, material, &mut out);
    out
}

// ---------------------------------------------------------------------------
// Random bytes
// ---------------------------------------------------------------------------

/// Generate `len` bytes from the system CSPRNG.
///
/// # Errors
///
/// Returns [`VaultError::Random`] if the system source fails.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| VaultError::Random("system random source unavailable".into()))?;
    Ok(buf)
}

/// Generate a fresh master key.
pub fn generate_master_key() -> Result<Vec<u8>> {
    random_bytes(KEY_LEN)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
