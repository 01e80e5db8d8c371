//! High-level client facade.
//!
//! [`SmartClient`] owns the collaborators and one [`Session`], and wires the
//! flow components together. It is the entry point for applications that do
//! not need to manage sessions themselves.

use std::sync::Arc;

use serde_json::Value;

use crate::config::ClientConfig;
use crate::conformance::ConformanceResolver;
use crate::error::Result;
use crate::flow::AuthorizationFlow;
use crate::gate::SessionGate;
use crate::presenter::AuthorizationPresenter;
use crate::refresh::TokenRefresher;
use crate::resources::FhirResourceClient;
use crate::session::Session;
use crate::store::SessionStore;
use crate::token::AuthResult;
use crate::transport::HttpTransport;

/// A SMART-on-FHIR client bound to one server and client id.
pub struct SmartClient {
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn SessionStore>,
    presenter: Arc<dyn AuthorizationPresenter>,
    session: Session,
}

impl SmartClient {
    /// Validate `config` and load (or create) its session from `store`.
    ///
    /// # Errors
    ///
    /// [`crate::SmartAuthError::InvalidConfig`] for a bad configuration, or a
    /// store error.
    pub async fn connect(
        config: &ClientConfig,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn SessionStore>,
        presenter: Arc<dyn AuthorizationPresenter>,
    ) -> Result<Self> {
        config.validate()?;
        let session = Session::load_or_init(store.as_ref(), config).await?;
        tracing::debug!(key = %session.key(), step = %session.step, "client connected");
        Ok(Self {
            transport,
            store,
            presenter,
            session,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn gate(&self) -> SessionGate<'_> {
        SessionGate::new(self.store.as_ref())
    }

    /// Start authorization and, if the presenter observes the redirect,
    /// complete it in the same call.
    pub async fn login(&mut self, extra_params: &[(String, String)]) -> Result<Option<AuthResult>> {
        match self.start(extra_params).await? {
            Some(callback_url) => self.handle_callback(&callback_url).await,
            None => Ok(None),
        }
    }

    /// Begin authorization. See [`AuthorizationFlow::start`].
    pub async fn start(&mut self, extra_params: &[(String, String)]) -> Result<Option<String>> {
        let flow = AuthorizationFlow::new(
            self.transport.as_ref(),
            self.store.as_ref(),
            self.presenter.as_ref(),
        );
        flow.start(&mut self.session, extra_params).await
    }

    /// Complete authorization from a callback URL.
    /// See [`AuthorizationFlow::complete_from_callback`].
    pub async fn handle_callback(&mut self, callback_url: &str) -> Result<Option<AuthResult>> {
        let flow = AuthorizationFlow::new(
            self.transport.as_ref(),
            self.store.as_ref(),
            self.presenter.as_ref(),
        );
        flow.complete_from_callback(&mut self.session, callback_url)
            .await
    }

    /// Renew the access token. See [`TokenRefresher::refresh`].
    pub async fn refresh(&mut self) -> Result<Option<AuthResult>> {
        TokenRefresher::new(self.transport.as_ref(), self.store.as_ref())
            .refresh(&mut self.session)
            .await
    }

    /// Fetch the capability statement and update the session's endpoints.
    pub async fn resolve_conformance(&mut self) -> Result<()> {
        ConformanceResolver::new(self.transport.as_ref(), self.store.as_ref())
            .resolve(&mut self.session)
            .await
    }

    /// Forget tokens and any pending authorization.
    pub async fn logout(&mut self) -> Result<()> {
        SessionGate::new(self.store.as_ref())
            .logout(&mut self.session)
            .await
    }

    /// Remove the stored session entirely.
    pub async fn forget(&mut self) -> Result<()> {
        self.logout().await?;
        self.store.clear(&self.session.key()).await
    }

    pub fn is_logged_in(&self) -> bool {
        self.gate().is_logged_in(&self.session)
    }

    pub fn access_token(&self) -> Option<&str> {
        self.gate().access_token(&self.session)
    }

    pub fn authorization_header(&self) -> Option<String> {
        self.gate().authorization_header(&self.session)
    }

    /// Resource operations authorized with this client's session.
    pub fn resources(&mut self) -> SessionResources<'_> {
        SessionResources {
            client: FhirResourceClient::new(self.transport.as_ref(), self.store.as_ref()),
            session: &mut self.session,
        }
    }
}

/// [`FhirResourceClient`] paired with the session it authorizes with.
pub struct SessionResources<'a> {
    client: FhirResourceClient<'a>,
    session: &'a mut Session,
}

impl SessionResources<'_> {
    pub async fn read(&mut self, resource_type: &str, id: &str) -> Result<Value> {
        self.client.read(self.session, resource_type, id).await
    }

    pub async fn create(&mut self, resource: &Value) -> Result<Value> {
        self.client.create(self.session, resource).await
    }

    pub async fn update(&mut self, resource: &Value) -> Result<Value> {
        self.client.update(self.session, resource).await
    }

    pub async fn search(&mut self, resource_type: &str, params: &[(String, String)]) -> Result<Value> {
        self.client.search(self.session, resource_type, params).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
