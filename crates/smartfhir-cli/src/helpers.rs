//! Shared helper functions used across CLI subcommands.

use anyhow::{Result, bail};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
///
/// Logs go to stderr; stdout is reserved for command output such as
/// `smartfhir token`.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Read a non-empty environment variable, returning `None` if unset or empty.
pub fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Split `key=value` arguments into pairs.
pub fn parse_key_values(args: &[String]) -> Result<Vec<(String, String)>> {
    args.iter()
        .map(|arg| match arg.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => bail!("expected KEY=VALUE, got '{arg}'"),
        })
        .collect()
}

/// Render an epoch-millisecond timestamp for display.
pub fn format_expiry(expires_at_ms: i64) -> String {
    match chrono::DateTime::from_timestamp_millis(expires_at_ms) {
        Some(at) => {
            let remaining = (expires_at_ms - chrono::Utc::now().timestamp_millis()) / 1000;
            if remaining > 0 {
                format!("{} (in {remaining}s)", at.format("%Y-%m-%d %H:%M:%S UTC"))
            } else {
                format!("{} (expired)", at.format("%Y-%m-%d %H:%M:%S UTC"))
            }
        }
        None => "unknown".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_values() {
        let pairs = parse_key_values(&[
            "prompt=login".to_string(),
            "code=http://loinc.org|1=2".to_string(),
        ])
        .unwrap();
        assert_eq!(pairs[0], ("prompt".to_string(), "login".to_string()));
        assert_eq!(pairs[1], ("code".to_string(), "http://loinc.org|1=2".to_string()));
    }

    #[test]
    fn key_values_reject_bare_words() {
        assert!(parse_key_values(&["oops".to_string()]).is_err());
        assert!(parse_key_values(&["=x".to_string()]).is_err());
    }

    #[test]
    fn expiry_formatting() {
        assert!(format_expiry(0).ends_with("(expired)"));
        let later = chrono::Utc::now().timestamp_millis() + 120_000;
        assert!(format_expiry(later).contains("(in "));
    }
}
