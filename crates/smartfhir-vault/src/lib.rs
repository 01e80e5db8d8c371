//! Encrypted session vault for smartfhir.
//!
//! Persists session snapshots for the authorization client so PKCE/state
//! material and tokens survive a process restart between the authorization
//! redirect and its callback. Payloads are sealed with AES-256-GCM; the
//! master key is held by a [`KeychainProvider`].
//!
//! # Modules
//!
//! - [`crypto`]: AES-256-GCM sealing, PBKDF2 key derivation, random bytes.
//! - [`keychain`]: master-key storage.
//! - [`store`]: SQLite-backed encrypted records.
//! - [`error`]: error types.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use smartfhir_vault::{FileKeychain, KeychainProvider, Vault};
//!
//! # fn example() -> smartfhir_vault::Result<()> {
//! let keychain = FileKeychain::new("data/master.key");
//! let key = keychain.load_or_create_master_key()?;
//! let vault = Vault::open("data/sessions.db", &key)?;
//!
//! vault.put("session-key", &serde_json::json!({ "step": "idle" }))?;
//! assert!(vault.get("session-key")?.is_some());
//! # Ok(())
//! # }
//! ```

pub mod crypto;
pub mod error;
pub mod keychain;
pub mod store;

pub use error::{Result, VaultError};
pub use keychain::{FileKeychain, KeychainProvider};
pub use store::{RecordSummary, Vault};
