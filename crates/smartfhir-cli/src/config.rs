//! Configuration loading.
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. `config/smartfhir.toml` (`[client]` and `[storage]` tables),
//! 2. `SMARTFHIR_*` environment variables (a `.env` file is loaded first),
//! 3. command-line flags.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use smartfhir_auth::ClientConfig;

use crate::cli::ClientOverrides;
use crate::helpers::env_non_empty;

/// Default directory for the vault database and key file.
const DEFAULT_DATA_DIR: &str = "data";

/// `[client]` keys that can be overridden from the environment.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("service_url", "SMARTFHIR_SERVICE_URL"),
    ("client_id", "SMARTFHIR_CLIENT_ID"),
    ("redirect_uri", "SMARTFHIR_REDIRECT_URI"),
    ("scope", "SMARTFHIR_SCOPE"),
    ("conformance_url", "SMARTFHIR_CONFORMANCE_URL"),
    ("language", "SMARTFHIR_LANGUAGE"),
    ("aud", "SMARTFHIR_AUD"),
    ("launch", "SMARTFHIR_LAUNCH"),
];

/// Where the encrypted session vault lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("sessions.db")
    }

    pub fn key_path(&self) -> PathBuf {
        smartfhir_vault::FileKeychain::default_path(&self.data_dir)
    }
}

/// Everything the CLI needs to build a client.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub client: ClientConfig,
    pub storage: StorageConfig,
}

/// Load configuration from `path`, the environment and `overrides`.
///
/// A missing file is not an error as long as the required client settings
/// come from elsewhere.
pub fn load(path: &Path, overrides: &ClientOverrides) -> Result<AppConfig> {
    let table: toml::Table = match std::fs::read_to_string(path) {
        Ok(content) => content
            .parse()
            .with_context(|| format!("failed to parse {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using environment and flags");
            toml::Table::new()
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    resolve(table, env_non_empty, overrides)
}

/// Merge the layers. `env` looks up an environment variable.
fn resolve(
    mut table: toml::Table,
    env: impl Fn(&str) -> Option<String>,
    overrides: &ClientOverrides,
) -> Result<AppConfig> {
    let mut client = match table.remove("client") {
        Some(toml::Value::Table(t)) => t,
        Some(_) => anyhow::bail!("[client] must be a table"),
        None => toml::Table::new(),
    };

    for (key, var) in ENV_OVERRIDES {
        if let Some(value) = env(var) {
            client.insert((*key).to_string(), toml::Value::String(value));
        }
    }
    if let Some(value) = env("SMARTFHIR_PKCE_DISABLED") {
        client.insert("pkce_disabled".to_string(), toml::Value::Boolean(is_truthy(&value)));
    }

    let flags = [
        ("service_url", &overrides.service_url),
        ("client_id", &overrides.client_id),
        ("redirect_uri", &overrides.redirect_uri),
        ("scope", &overrides.scope),
    ];
    for (key, value) in flags {
        if let Some(value) = value {
            client.insert(key.to_string(), toml::Value::String(value.clone()));
        }
    }

    let client: ClientConfig = toml::Value::Table(client)
        .try_into()
        .context("incomplete [client] configuration (service_url, client_id and redirect_uri are required)")?;
    client.validate()?;

    let data_dir = overrides
        .data_dir
        .clone()
        .or_else(|| env("SMARTFHIR_DATA_DIR").map(PathBuf::from))
        .or_else(|| {
            table
                .get("storage")
                .and_then(|s| s.get("data_dir"))
                .and_then(|v| v.as_str())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

    Ok(AppConfig {
        client,
        storage: StorageConfig { data_dir },
    })
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
