//! SQLite-backed encrypted record store.
//!
//! [`Vault`] keeps one row per session key. The JSON payload is sealed with
//! AES-256-GCM before it is written (the row key is bound as associated
//! data) and opened again on read.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE records (
//!     key        TEXT PRIMARY KEY,
//!     data       BLOB NOT NULL,
//!     nonce      BLOB NOT NULL,
//!     created_at INTEGER NOT NULL,
//!     updated_at INTEGER NOT NULL
//! );
//! ```

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::error::{Result, VaultError};

/// Metadata about a stored record, without its payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSummary {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Encrypted record vault.
///
/// ```rust,no_run
/// # use smartfhir_vault::store::Vault;
/// # fn example() -> smartfhir_vault::Result<()> {
/// # let master_key = [0u8; 32];
/// let vault = Vault::open("data/sessions.db", &master_key)?;
/// vault.put("smartfhir:session:app@https://fhir.example.org", &serde_json::json!({}))?;
/// # Ok(())
/// # }
/// ```
pub struct Vault {
    conn: Connection,
    master_key: Vec<u8>,
}

impl Vault {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] if SQLite cannot open the file, or
    /// [`VaultError::MigrationFailed`] if the schema cannot be created.
    pub fn open(path: impl AsRef<std::path::Path>, master_key: &[u8]) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening session vault");

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        Self::init(conn, master_key)
    }

    /// Open a vault that lives only as long as the returned value.
    pub fn open_in_memory(master_key: &[u8]) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, master_key)
    }

    fn init(conn: Connection, master_key: &[u8]) -> Result<Self> {
        if master_key.len() != crypto::KEY_LEN {
            return Err(VaultError::EncryptionFailed {
                reason: format!(
                    "master key must be {} bytes, got {}",
                    crypto::KEY_LEN,
                    master_key.len()
                ),
            });
        }

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                key        TEXT PRIMARY KEY,
                data       BLOB NOT NULL,
                nonce      BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )
        .map_err(|e| VaultError::MigrationFailed {
            reason: e.to_string(),
        })?;

        Ok(Self {
            conn,
            master_key: master_key.to_vec(),
        })
    }

    /// Insert or replace the record stored under `key`.
    pub fn put(&self, key: &str, data: &serde_json::Value) -> Result<()> {
        let plaintext = serde_json::to_vec(data)?;
        let (nonce, sealed) = crypto::seal(&plaintext, key.as_bytes(), &self.master_key)?;
        let now = Utc::now().timestamp();

        self.conn.execute(
            "INSERT INTO records (key, data, nonce, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(key) DO UPDATE SET
                data = excluded.data,
                nonce = excluded.nonce,
                updated_at = excluded.updated_at",
            params![key, sealed, nonce.as_slice(), now],
        )?;

        tracing::debug!(key = key, "stored vault record");
        Ok(())
    }

    /// Fetch and open the record stored under `key`.
    pub fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let row: Option<(Vec<u8>, Vec<u8>)> = self
            .conn
            .query_row(
                "SELECT data, nonce FROM records WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((sealed, nonce_bytes)) = row else {
            return Ok(None);
        };

        let nonce: [u8; crypto::NONCE_LEN_BYTES] =
            nonce_bytes
                .as_slice()
                .try_into()
                .map_err(|_| VaultError::CorruptRecord {
                    key: key.to_string(),
                    reason: format!("nonce has {} bytes", nonce_bytes.len()),
                })?;

        let plaintext = crypto::open(&nonce, &sealed, key.as_bytes(), &self.master_key)?;
        Ok(Some(serde_json::from_slice(&plaintext)?))
    }

    /// Delete the record under `key`. Returns whether a row was removed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM records WHERE key = ?1", params![key])?;
        if rows > 0 {
            tracing::debug!(key = key, "deleted vault record");
        }
        Ok(rows > 0)
    }

    /// List stored records, ordered by key.
    pub fn list(&self) -> Result<Vec<RecordSummary>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, created_at, updated_at FROM records ORDER BY key")?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (key, created_at, updated_at) = row?;
            out.push(RecordSummary {
                key,
                created_at: DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
                updated_at: DateTime::from_timestamp(updated_at, 0).unwrap_or_default(),
            });
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> Vault {
        let key = crypto::generate_master_key().unwrap();
        Vault::open_in_memory(&key).unwrap()
    }

    #[test]
    fn get_missing_is_none() {
        let vault = test_vault();
        assert!(vault.get("nope").unwrap().is_none());
    }

    #[test]
    fn put_overwrites() {
        let vault = test_vault();
        vault.put("k", &serde_json::json!({"v": 1})).unwrap();
        vault.put("k", &serde_json::json!({"v": 2})).unwrap();
        assert_eq!(vault.get("k").unwrap().unwrap()["v"], 2);
        assert_eq!(vault.list().unwrap().len(), 1);
    }

    #[test]
    fn payload_is_not_stored_in_clear() {
        let vault = test_vault();
        vault
            .put("k", &serde_json::json!({"access_token": "plain-secret"}))
            .unwrap();

        let raw: Vec<u8> = vault
            .conn
            .query_row("SELECT data FROM records WHERE key = 'k'", [], |row| {
                row.get(0)
            })
            .unwrap();
        let needle = b"plain-secret";
        assert!(!raw.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn wrong_master_key_length_rejected() {
        assert!(Vault::open_in_memory(&[1u8; 8]).is_err());
    }
}
