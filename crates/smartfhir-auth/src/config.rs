//! Client configuration.
//!
//! [`ClientConfig`] describes one connection: which FHIR server, which
//! registered client, where the authorization server redirects back to.
//! It deserializes from the `[client]` table of the CLI's TOML file and can
//! also be assembled with the `with_*` builder methods.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, SmartAuthError};

/// Scope requested when none is configured.
pub const DEFAULT_SCOPE: &str = "user/*.*";

/// Content type sent to and accepted from the resource server.
pub const DEFAULT_CONTENT_TYPE: &str = "application/fhir+json;fhirVersion=4.0";

/// Configuration for a single server + client connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// FHIR base URL, e.g. `https://test.midata.coop/fhir`.
    pub service_url: String,

    /// The registered OAuth client id.
    pub client_id: String,

    /// Redirect target registered with the authorization server.
    pub redirect_uri: String,

    /// Requested scope.
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Capability statement location; `{service_url}/metadata` when absent.
    #[serde(default)]
    pub conformance_url: Option<String>,

    /// Two-letter UI language hint for the login page.
    #[serde(default)]
    pub language: Option<String>,

    /// Audience sent as `aud`; the service URL when absent.
    #[serde(default)]
    pub aud: Option<String>,

    /// EHR launch context token.
    #[serde(default)]
    pub launch: Option<String>,

    /// The server is open; skip authorization entirely.
    #[serde(default)]
    pub no_auth_required: bool,

    /// Do not send PKCE parameters.
    #[serde(default)]
    pub pkce_disabled: bool,

    /// Content type for resource requests.
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

impl ClientConfig {
    /// Create a configuration with defaults for everything optional.
    pub fn new(
        service_url: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            service_url: service_url.into(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scope: default_scope(),
            conformance_url: None,
            language: None,
            aud: None,
            launch: None,
            no_auth_required: false,
            pkce_disabled: false,
            content_type: default_content_type(),
        }
    }

    /// Set the requested scope.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Override the capability statement location.
    pub fn with_conformance_url(mut self, url: impl Into<String>) -> Self {
        self.conformance_url = Some(url.into());
        self
    }

    /// Set the login page language.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Override the `aud` parameter.
    pub fn with_aud(mut self, aud: impl Into<String>) -> Self {
        self.aud = Some(aud.into());
        self
    }

    /// Set an EHR launch token.
    pub fn with_launch(mut self, launch: impl Into<String>) -> Self {
        self.launch = Some(launch.into());
        self
    }

    /// Mark the server as not requiring authorization.
    pub fn with_no_auth_required(mut self, no_auth_required: bool) -> Self {
        self.no_auth_required = no_auth_required;
        self
    }

    /// Enable or disable PKCE.
    pub fn with_pkce_disabled(mut self, pkce_disabled: bool) -> Self {
        self.pkce_disabled = pkce_disabled;
        self
    }

    /// Override the resource content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// The service URL without a trailing slash.
    pub fn normalized_service_url(&self) -> &str {
        self.service_url.trim_end_matches('/')
    }

    /// Check that the URLs parse and required fields are present.
    ///
    /// # Errors
    ///
    /// Returns [`SmartAuthError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(SmartAuthError::InvalidConfig { reason });

        if self.client_id.trim().is_empty() {
            return invalid("client_id is empty".to_string());
        }
        if Url::parse(&self.service_url).is_err() {
            return invalid(format!("service_url is not a URL: {}", self.service_url));
        }
        if Url::parse(&self.redirect_uri).is_err() {
            return invalid(format!("redirect_uri is not a URL: {}", self.redirect_uri));
        }
        if let Some(ref url) = self.conformance_url
            && Url::parse(url).is_err()
        {
            return invalid(format!("conformance_url is not a URL: {url}"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ClientConfig {
        ClientConfig::new(
            "https://fhir.example.org/fhir/",
            "my-app",
            "http://127.0.0.1:8400/callback",
        )
    }

    #[test]
    fn defaults() {
        let config = base();
        assert_eq!(config.scope, "user/*.*");
        assert_eq!(config.content_type, DEFAULT_CONTENT_TYPE);
        assert!(!config.no_auth_required);
        assert!(!config.pkce_disabled);
        assert_eq!(config.normalized_service_url(), "https://fhir.example.org/fhir");
    }

    #[test]
    fn builder_sets_fields() {
        let config = base()
            .with_scope("patient/*.read openid fhirUser")
            .with_language("de")
            .with_launch("xyz")
            .with_pkce_disabled(true);
        assert_eq!(config.scope, "patient/*.read openid fhirUser");
        assert_eq!(config.language.as_deref(), Some("de"));
        assert_eq!(config.launch.as_deref(), Some("xyz"));
        assert!(config.pkce_disabled);
    }

    #[test]
    fn validate_accepts_good_config() {
        base().validate().unwrap();
    }

    #[test]
    fn validate_rejects_empty_client_id() {
        let mut config = base();
        config.client_id = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(SmartAuthError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn validate_rejects_bad_redirect() {
        let mut config = base();
        config.redirect_uri = "not a url".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("redirect_uri"));
    }

    #[test]
    fn deserializes_with_defaults() {
        let json = r#"{
            "service_url": "https://fhir.example.org/fhir",
            "client_id": "app",
            "redirect_uri": "http://localhost/callback"
        }"#;
        let config: ClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.scope, DEFAULT_SCOPE);
        assert!(config.conformance_url.is_none());
    }
}
