//! Master-key storage for the session vault.
//!
//! The vault's AES key never touches disk in the clear. [`KeychainProvider`]
//! abstracts where it lives; [`FileKeychain`] is the portable backend that
//! wraps the key with a key derived from machine and user identity.
//!
//! Key file layout:
//!
//! ```text
//! [32 bytes: PBKDF2 salt][12 bytes: nonce][sealed master key + 16-byte tag]
//! ```
//!
//! The file is only as strong as the machine/user identity it is derived
//! from; anyone who can log in as the same user on the same host can unwrap it.

use std::path::{Path, PathBuf};

use crate::crypto;
use crate::error::{Result, VaultError};

/// Associated data bound into the sealed master key.
const KEY_FILE_AAD: &[u8] = b"smartfhir-vault/master-key/v1";

/// Smallest well-formed key file: salt + nonce + GCM tag.
const MIN_KEY_FILE_LEN: usize = crypto::SALT_LEN + crypto::NONCE_LEN_BYTES + 16;

/// Where the vault's master key is kept.
pub trait KeychainProvider: Send + Sync {
    /// Fetch the master key, or [`VaultError::MasterKeyNotFound`].
    fn get_master_key(&self) -> Result<Vec<u8>>;

    /// Store or replace the master key.
    fn set_master_key(&self, key: &[u8]) -> Result<()>;

    /// Remove the master key. Missing keys are not an error.
    fn delete_master_key(&self) -> Result<()>;

    /// Fetch the master key, generating and storing one on first use.
    fn load_or_create_master_key(&self) -> Result<Vec<u8>> {
        match self.get_master_key() {
            Ok(key) => Ok(key),
            Err(VaultError::MasterKeyNotFound) => {
                let key = crypto::generate_master_key()?;
                self.set_master_key(&key)?;
                tracing::info!("generated new vault master key");
                Ok(key)
            }
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// File keychain
// ---------------------------------------------------------------------------

/// File-backed keychain.
pub struct FileKeychain {
    key_file: PathBuf,
}

impl FileKeychain {
    /// Keychain stored at `key_file`; parent directories are created on write.
    pub fn new(key_file: impl Into<PathBuf>) -> Self {
        Self {
            key_file: key_file.into(),
        }
    }

    /// `<dir>/master.key`.
    pub fn default_path(dir: &Path) -> PathBuf {
        dir.join("master.key")
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.key_file
    }

    fn wrapping_key(salt: &[u8]) -> [u8; crypto::KEY_LEN] {
        let host = host_name();
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown-user".into());

        let material = format!("{host}\u{0}{user}");
        crypto::derive_key(material.as_bytes(), salt)
    }
}

fn host_name() -> String {
    #[cfg(unix)]
    {
        std::fs::read_to_string("/etc/hostname")
            .map(|s| s.trim().to_string())
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "unknown-host".into())
    }

    #[cfg(not(unix))]
    {
        std::env::var("COMPUTERNAME").unwrap_or_else(|_| "unknown-host".into())
    }
}

impl KeychainProvider for FileKeychain {
    fn get_master_key(&self) -> Result<Vec<u8>> {
        if !self.key_file.exists() {
            return Err(VaultError::MasterKeyNotFound);
        }

        let data = std::fs::read(&self.key_file)?;
        if data.len() < MIN_KEY_FILE_LEN {
            return Err(VaultError::KeychainUnavailable {
                reason: format!("{} is truncated", self.key_file.display()),
            });
        }

        let (salt, rest) = data.split_at(crypto::SALT_LEN);
        let (nonce_bytes, sealed) = rest.split_at(crypto::NONCE_LEN_BYTES);
        let mut nonce = [0u8; crypto::NONCE_LEN_BYTES];
        nonce.copy_from_slice(nonce_bytes);

        let wrapping_key = Self::wrapping_key(salt);
        let key = crypto::open(&nonce, sealed, KEY_FILE_AAD, &wrapping_key)?;

        tracing::debug!(path = %self.key_file.display(), "loaded vault master key");
        Ok(key)
    }

    fn set_master_key(&self, key: &[u8]) -> Result<()> {
        let salt = crypto::random_bytes(crypto::SALT_LEN)?;
        let wrapping_key = Self::wrapping_key(&salt);
        let (nonce, sealed) = crypto::seal(key, KEY_FILE_AAD, &wrapping_key)?;

        let mut data = Vec::with_capacity(MIN_KEY_FILE_LEN + key.len());
        data.extend_from_slice(&salt);
        data.extend_from_slice(&nonce);
        data.extend_from_slice(&sealed);

        if let Some(parent) = self.key_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.key_file, &data)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.key_file, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::info!(path = %self.key_file.display(), "stored vault master key");
        Ok(())
    }

    fn delete_master_key(&self) -> Result<()> {
        if self.key_file.exists() {
            std::fs::remove_file(&self.key_file)?;
            tracing::info!(path = %self.key_file.display(), "deleted vault master key");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
