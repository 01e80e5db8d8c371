//! Session persistence.
//!
//! The [`SessionStore`] trait is the seam between the flow components and
//! wherever sessions live. [`MemorySessionStore`] keeps them for the life of
//! the process; [`VaultSessionStore`] writes them encrypted to a
//! `smartfhir-vault` database so they survive restarts.

use std::collections::HashMap;

use async_trait::async_trait;
use smartfhir_vault::Vault;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::session::{Session, SessionKey};

/// Key/value persistence for [`Session`] records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the session stored under `key`, if any.
    async fn load(&self, key: &SessionKey) -> Result<Option<Session>>;

    /// Store `session` under `key`, replacing what was there.
    async fn save(&self, key: &SessionKey, session: &Session) -> Result<()>;

    /// Remove whatever is stored under `key`.
    async fn clear(&self, key: &SessionKey) -> Result<()>;
}

// ---------------------------------------------------------------------------
// MemorySessionStore
// ---------------------------------------------------------------------------

/// Process-scoped store. Sessions are kept as serialized JSON.
#[derive(Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<Session>> {
        let entries = self.entries.lock().await;
        entries
            .get(key.as_str())
            .map(|json| serde_json::from_str(json).map_err(Into::into))
            .transpose()
    }

    async fn save(&self, key: &SessionKey, session: &Session) -> Result<()> {
        let json = serde_json::to_string(session)?;
        self.entries.lock().await.insert(key.to_string(), json);
        Ok(())
    }

    async fn clear(&self, key: &SessionKey) -> Result<()> {
        self.entries.lock().await.remove(key.as_str());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// VaultSessionStore
// ---------------------------------------------------------------------------

/// Encrypted on-disk store backed by a [`Vault`].
///
/// The vault's SQLite connection is used from one task at a time; each call
/// holds the lock only for the duration of a single statement.
pub struct VaultSessionStore {
    vault: Mutex<Vault>,
}

impl VaultSessionStore {
    pub fn new(vault: Vault) -> Self {
        Self {
            vault: Mutex::new(vault),
        }
    }
}

#[async_trait]
impl SessionStore for VaultSessionStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<Session>> {
        let vault = self.vault.lock().await;
        match vault.get(key.as_str())? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, key: &SessionKey, session: &Session) -> Result<()> {
        let value = serde_json::to_value(session)?;
        self.vault.lock().await.put(key.as_str(), &value)?;
        Ok(())
    }

    async fn clear(&self, key: &SessionKey) -> Result<()> {
        let removed = self.vault.lock().await.delete(key.as_str())?;
        tracing::debug!(key = %key, removed, "cleared stored session");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
