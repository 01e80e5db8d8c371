//! Error types for the authorization client.
//!
//! Every operation surfaces failures through [`SmartAuthError`]. None of
//! them are retried internally; the variant tells the caller what to do next
//! (restart the flow, re-authenticate, fix configuration).

/// Unified error type for the smartfhir authorization client.
#[derive(Debug, thiserror::Error)]
pub enum SmartAuthError {
    /// The capability statement could not be fetched or did not describe the
    /// OAuth endpoints. The flow cannot proceed to authorization.
    #[error("conformance statement unusable (HTTP {status}): {message}")]
    Conformance {
        /// HTTP status of the metadata response (0 if none was received).
        status: u16,
        /// What was wrong with the response.
        message: String,
    },

    /// The callback's `state` did not match the pending authorization
    /// request. Either a forged callback or a stale/duplicate one.
    #[error("state parameter mismatch (possible CSRF or replayed callback)")]
    StateMismatch,

    /// The token endpoint rejected an authorization-code or refresh grant.
    #[error("token request failed (HTTP {status}): {message}")]
    TokenExchange {
        /// HTTP status of the token response.
        status: u16,
        /// OAuth error description, or the raw response body.
        message: String,
    },

    /// No refresh token is stored; the user must authenticate again.
    #[error("no refresh token available, re-authentication required")]
    InvalidRefreshToken,

    /// A resource server rejected the access token. The session has been
    /// logged out.
    #[error("unauthorized (HTTP {status}): {message}")]
    Unauthorized {
        /// HTTP status of the rejected request.
        status: u16,
        /// Response body of the rejected request.
        message: String,
    },

    /// An authorized operation was attempted without a valid login.
    #[error("not logged in")]
    NotAuthenticated,

    /// The authorization server redirected back with an `error` parameter.
    #[error("authorization denied: {error}{}", paren_suffix(.description))]
    AuthorizationDenied {
        /// OAuth error code, e.g. `access_denied`.
        error: String,
        /// Optional `error_description`.
        description: Option<String>,
        /// `state` echoed back with the error, if any.
        state: Option<String>,
    },

    /// A resource operation failed with a non-success status.
    #[error("resource request failed (HTTP {status}): {message}")]
    ResourceRequest {
        /// HTTP status of the response.
        status: u16,
        /// Response body.
        message: String,
    },

    /// Configuration is missing or malformed.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// The system random source failed.
    #[error("secure random source failed")]
    Random,

    /// The loopback presenter gave up waiting for the redirect.
    #[error("authorization callback timed out after {timeout_secs} seconds")]
    CallbackTimeout {
        /// Seconds waited.
        timeout_secs: u64,
    },

    /// HTTP transport failure.
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Session vault failure.
    #[error("session store error: {0}")]
    Store(#[from] smartfhir_vault::VaultError),

    /// JSON serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// I/O error (loopback listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn paren_suffix(detail: &Option<String>) -> String {
    detail.as_deref().map(|d| format!(" ({d})")).unwrap_or_default()
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, SmartAuthError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_conformance() {
        let err = SmartAuthError::Conformance {
            status: 404,
            message: "not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "conformance statement unusable (HTTP 404): not found"
        );
    }

    #[test]
    fn display_token_exchange() {
        let err = SmartAuthError::TokenExchange {
            status: 400,
            message: "invalid_grant".to_string(),
        };
        assert_eq!(err.to_string(), "token request failed (HTTP 400): invalid_grant");
    }

    #[test]
    fn display_authorization_denied() {
        let err = SmartAuthError::AuthorizationDenied {
            error: "access_denied".to_string(),
            description: Some("user said no".to_string()),
            state: None,
        };
        assert_eq!(
            err.to_string(),
            "authorization denied: access_denied (user said no)"
        );

        let err = SmartAuthError::AuthorizationDenied {
            error: "access_denied".to_string(),
            description: None,
            state: Some("s".to_string()),
        };
        assert_eq!(err.to_string(), "authorization denied: access_denied");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SmartAuthError>();
    }
}
