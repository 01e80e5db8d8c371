//! Capability statement discovery.
//!
//! A SMART server advertises its OAuth endpoints inside the capability
//! statement at `rest[0].security.extension`:
//!
//! ```json
//! { "url": "http://fhir-registry.smarthealthit.org/StructureDefinition/oauth-uris",
//!   "extension": [
//!     { "url": "token",     "valueUri": "https://auth.example/token" },
//!     { "url": "authorize", "valueUri": "https://auth.example/authorize" }
//!   ] }
//! ```
//!
//! Sub-extensions are matched by `url`; servers that omit the names are read
//! positionally (token first, authorize second).

use serde::Deserialize;

use crate::error::{Result, SmartAuthError};
use crate::session::Session;
use crate::store::SessionStore;
use crate::transport::{HttpRequest, HttpTransport};

/// Suffix of the SMART OAuth URIs extension.
pub const OAUTH_URIS_SUFFIX: &str = "oauth-uris";

/// `Accept` header for the metadata request.
const METADATA_ACCEPT: &str = "application/fhir+json, application/json";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// The parts of a CapabilityStatement this client reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityStatement {
    #[serde(default)]
    pub fhir_version: Option<String>,
    #[serde(default)]
    pub rest: Vec<RestComponent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RestComponent {
    #[serde(default)]
    pub security: Option<Security>,
    #[serde(default)]
    pub resource: Vec<RestResource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Security {
    #[serde(default)]
    pub extension: Vec<Extension>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestResource {
    #[serde(rename = "type")]
    pub resource_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub value_uri: Option<String>,
    #[serde(default)]
    pub extension: Vec<Extension>,
}

/// OAuth endpoints advertised by a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthEndpoints {
    pub token: String,
    pub authorize: String,
}

impl CapabilityStatement {
    /// Locate the token and authorize URIs, if the statement carries them.
    pub fn oauth_endpoints(&self) -> Option<OAuthEndpoints> {
        let extensions = &self.rest.first()?.security.as_ref()?.extension;
        let oauth = extensions
            .iter()
            .find(|e| e.url.ends_with(OAUTH_URIS_SUFFIX))
            .or_else(|| extensions.first())?;

        let token = oauth.sub_uri("token", 0)?;
        let authorize = oauth.sub_uri("authorize", 1)?;
        Some(OAuthEndpoints { token, authorize })
    }

    /// Resource types listed for the first rest entry.
    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.rest
            .first()
            .into_iter()
            .flat_map(|rest| rest.resource.iter().map(|r| r.resource_type.as_str()))
    }
}

impl Extension {
    /// `valueUri` of the sub-extension named `name`, else of the one at
    /// `position`.
    fn sub_uri(&self, name: &str, position: usize) -> Option<String> {
        self.extension
            .iter()
            .find(|e| e.url == name)
            .or_else(|| self.extension.get(position))
            .and_then(|e| e.value_uri.clone())
            .filter(|uri| !uri.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Fetches the capability statement and records what it says on the session.
pub struct ConformanceResolver<'a> {
    transport: &'a dyn HttpTransport,
    store: &'a dyn SessionStore,
}

impl<'a> ConformanceResolver<'a> {
    pub fn new(transport: &'a dyn HttpTransport, store: &'a dyn SessionStore) -> Self {
        Self { transport, store }
    }

    /// Fetch `session.urls.conformance` and store the OAuth endpoints, FHIR
    /// version and supported resource types on `session`, then persist it.
    ///
    /// # Errors
    ///
    /// [`SmartAuthError::Conformance`] when the server cannot be reached, the
    /// response is not 200 or not a capability statement, or (unless the
    /// server needs no authorization) it does not advertise OAuth endpoints.
    pub async fn resolve(&self, session: &mut Session) -> Result<()> {
        tracing::debug!(url = %session.urls.conformance, "fetching capability statement");

        let request =
            HttpRequest::get(session.urls.conformance.clone()).header("Accept", METADATA_ACCEPT);
        let response = self.transport.call(request).await.map_err(|e| {
            SmartAuthError::Conformance {
                status: 0,
                message: format!("capability statement unreachable: {e}"),
            }
        })?;

        if response.status != 200 {
            return Err(SmartAuthError::Conformance {
                status: response.status,
                message: response.body,
            });
        }

        let statement: CapabilityStatement =
            serde_json::from_str(&response.body).map_err(|e| SmartAuthError::Conformance {
                status: response.status,
                message: format!("not a capability statement: {e}"),
            })?;

        match statement.oauth_endpoints() {
            Some(endpoints) => {
                session.urls.token_endpoint = endpoints.token;
                session.urls.authorize_endpoint = endpoints.authorize;
            }
            None if session.settings.no_auth_required => {}
            None => {
                return Err(SmartAuthError::Conformance {
                    status: response.status,
                    message: "no OAuth endpoints in rest[0].security.extension".to_string(),
                });
            }
        }

        session.settings.fhir_version = statement.fhir_version.clone();
        session.settings.supported_resource_types =
            statement.resource_types().map(str::to_string).collect();

        self.store.save(&session.key(), session).await?;

        tracing::info!(
            token_endpoint = %session.urls.token_endpoint,
            authorize_endpoint = %session.urls.authorize_endpoint,
            fhir_version = session.settings.fhir_version.as_deref().unwrap_or("unknown"),
            resource_types = session.settings.supported_resource_types.len(),
            "capability statement resolved"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
