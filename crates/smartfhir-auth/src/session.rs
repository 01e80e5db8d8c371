//! The persisted session record.
//!
//! A [`Session`] is plain data: endpoints, settings, the in-flight
//! authorization request and the current tokens. Components receive it by
//! `&mut` and write it back through a [`SessionStore`] after each change, so
//! a process that is restarted between the authorization redirect and the
//! callback picks up exactly where the previous one left off.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::store::SessionStore;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// Storage key for a session, unique per service URL + client id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    /// Key for `client_id` talking to `service_url`.
    pub fn new(service_url: &str, client_id: &str) -> Self {
        Self(format!(
            "smartfhir:session:{client_id}@{}",
            service_url.trim_end_matches('/')
        ))
    }

    /// Key for a configured connection.
    pub fn for_config(config: &ClientConfig) -> Self {
        Self::new(&config.service_url, &config.client_id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Record types
// ---------------------------------------------------------------------------

/// Endpoint URLs. The authorize and token endpoints stay empty until the
/// capability statement has been resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUrls {
    pub service: String,
    pub conformance: String,
    pub authorize_endpoint: String,
    pub token_endpoint: String,
    pub redirect: String,
}

impl SessionUrls {
    /// Both OAuth endpoints are known.
    pub fn endpoints_resolved(&self) -> bool {
        !self.authorize_endpoint.is_empty() && !self.token_endpoint.is_empty()
    }
}

/// Client settings and facts discovered from the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub client_id: String,
    pub scope: String,
    pub response_type: String,
    pub language: Option<String>,
    pub aud: Option<String>,
    pub launch: Option<String>,
    pub supported_resource_types: BTreeSet<String>,
    pub fhir_version: Option<String>,
    pub no_auth_required: bool,
    pub pkce_disabled: bool,
    pub content_type: String,
}

/// Material for the authorization request currently in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFlow {
    pub state: String,
    pub code_verifier: Option<String>,
    pub code_challenge: Option<String>,
}

/// Tokens issued by the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub token_type: String,
    /// Expiry in epoch milliseconds, already reduced by a safety margin.
    pub expires_at_ms: i64,
    pub refresh_token: Option<String>,
    /// The authenticated principal, e.g. the `patient` id.
    pub subject: Option<String>,
    pub scope: Option<String>,
}

impl AuthTokens {
    /// Non-empty and not yet expired at `now_ms`.
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        !self.access_token.is_empty() && self.expires_at_ms > now_ms
    }
}

/// Where the authorization lifecycle currently stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStep {
    #[default]
    Idle,
    ConformanceResolving,
    AwaitingAuthorization,
    ExchangingToken,
    Authenticated,
    Failed,
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::ConformanceResolving => "conformance_resolving",
            Self::AwaitingAuthorization => "awaiting_authorization",
            Self::ExchangingToken => "exchanging_token",
            Self::Authenticated => "authenticated",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Everything the client knows about one server + client connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub urls: SessionUrls,
    pub settings: SessionSettings,
    #[serde(default)]
    pub pending_flow: Option<PendingFlow>,
    #[serde(default)]
    pub auth: Option<AuthTokens>,
    #[serde(default)]
    pub step: FlowStep,
}

impl Session {
    /// A fresh session for `config`, with no endpoints resolved.
    pub fn from_config(config: &ClientConfig) -> Self {
        let service = config.normalized_service_url().to_string();
        let mut session = Self {
            urls: SessionUrls {
                service: service.clone(),
                redirect: config.redirect_uri.clone(),
                ..SessionUrls::default()
            },
            settings: SessionSettings {
                client_id: config.client_id.clone(),
                response_type: "code".to_string(),
                ..SessionSettings::default()
            },
            ..Self::default()
        };
        session.apply_config(config);
        session
    }

    /// Copy the configurable settings from `config` onto this session,
    /// keeping tokens, the pending request and discovered facts.
    fn apply_config(&mut self, config: &ClientConfig) {
        let conformance = config
            .conformance_url
            .clone()
            .unwrap_or_else(|| format!("{}/metadata", self.urls.service));
        if conformance != self.urls.conformance {
            self.urls.conformance = conformance;
            self.urls.authorize_endpoint.clear();
            self.urls.token_endpoint.clear();
        }

        let settings = &mut self.settings;
        settings.scope = config.scope.clone();
        settings.language = config.language.clone();
        settings.aud = Some(
            config
                .aud
                .clone()
                .unwrap_or_else(|| self.urls.service.clone()),
        );
        settings.launch = config.launch.clone();
        settings.no_auth_required = config.no_auth_required;
        settings.pkce_disabled = config.pkce_disabled;
        settings.content_type = config.content_type.clone();
    }

    /// Whether a stored session belongs to the same identity and redirect
    /// target as `config`.
    fn matches(&self, config: &ClientConfig) -> bool {
        self.urls.service == config.normalized_service_url()
            && self.settings.client_id == config.client_id
            && self.urls.redirect == config.redirect_uri
    }

    /// Rehydrate the session for `config` from `store`, or create and
    /// persist a new one if nothing matching is stored.
    pub async fn load_or_init(store: &dyn SessionStore, config: &ClientConfig) -> Result<Self> {
        let key = SessionKey::for_config(config);

        let session = match store.load(&key).await? {
            Some(mut stored) if stored.matches(config) => {
                tracing::debug!(key = %key, step = %stored.step, "restored session");
                stored.apply_config(config);
                stored
            }
            _ => {
                tracing::debug!(key = %key, "initialising new session");
                Self::from_config(config)
            }
        };

        store.save(&key, &session).await?;
        Ok(session)
    }

    /// This session's storage key.
    pub fn key(&self) -> SessionKey {
        SessionKey::new(&self.urls.service, &self.settings.client_id)
    }

    /// Drop the pending authorization request.
    pub fn clear_pending_flow(&mut self) {
        self.pending_flow = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
