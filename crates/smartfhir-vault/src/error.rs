//! Vault error types.
//!
//! Every public API of this crate reports failures through [`VaultError`].
//! Variants are grouped by the subsystem that raises them.

/// Unified error type for the smartfhir session vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    // -- Crypto errors ------------------------------------------------------
    /// Sealing a record failed (bad key length, ring internal error).
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    /// Opening a record failed (wrong key, tampered ciphertext, bad nonce).
    #[error("decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    // -- Keychain errors ----------------------------------------------------
    /// No master key has been written to the keychain yet.
    #[error("master key not found in keychain")]
    MasterKeyNotFound,

    /// The keychain file exists but cannot be used.
    #[error("keychain unavailable: {reason}")]
    KeychainUnavailable { reason: String },

    // -- Store errors -------------------------------------------------------
    /// Schema setup failed when opening the database.
    #[error("migration failed: {reason}")]
    MigrationFailed { reason: String },

    /// A stored row could not be interpreted.
    #[error("corrupt record for key {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    // -- Underlying errors --------------------------------------------------
    /// SQLite error from `rusqlite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error (keychain file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The system random source failed.
    #[error("random source failure: {0}")]
    Random(String),
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, VaultError>;
