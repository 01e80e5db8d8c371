//! The authorization code flow.
//!
//! The flow spans a browser navigation, so it is split in two halves that
//! may run in different processes:
//!
//! 1. [`AuthorizationFlow::start`] generates `state` (and a PKCE pair),
//!    resolves the server's endpoints, persists everything and presents the
//!    authorization URL.
//! 2. [`AuthorizationFlow::complete_from_callback`] checks the callback's
//!    `state` against the persisted one and redeems the code.
//!
//! `session.step` records which half the session is in. The pending request
//! is single-use: it is dropped as soon as a callback is checked against it.

use url::Url;

use crate::callback;
use crate::conformance::ConformanceResolver;
use crate::error::{Result, SmartAuthError};
use crate::pkce::{self, PkcePair};
use crate::presenter::AuthorizationPresenter;
use crate::random;
use crate::session::{FlowStep, PendingFlow, Session, now_ms};
use crate::store::SessionStore;
use crate::token::{AuthResult, TokenEndpoint};
use crate::transport::HttpTransport;

/// Drives the authorization code flow for one session.
pub struct AuthorizationFlow<'a> {
    transport: &'a dyn HttpTransport,
    store: &'a dyn SessionStore,
    presenter: &'a dyn AuthorizationPresenter,
}

impl<'a> AuthorizationFlow<'a> {
    pub fn new(
        transport: &'a dyn HttpTransport,
        store: &'a dyn SessionStore,
        presenter: &'a dyn AuthorizationPresenter,
    ) -> Self {
        Self {
            transport,
            store,
            presenter,
        }
    }

    /// Begin authorization.
    ///
    /// `extra_params` are appended to the authorization URL after the
    /// standard ones. Returns the callback URL when the presenter observed
    /// the redirect; `None` when the callback will arrive separately, or the
    /// server needs no authorization.
    ///
    /// # Errors
    ///
    /// [`SmartAuthError::Conformance`] if the endpoints cannot be resolved;
    /// the pending request is discarded and the session marked failed.
    pub async fn start(
        &self,
        session: &mut Session,
        extra_params: &[(String, String)],
    ) -> Result<Option<String>> {
        let resolver = ConformanceResolver::new(self.transport, self.store);

        if session.settings.no_auth_required {
            tracing::info!(service = %session.urls.service, "server requires no authorization");
            resolver.resolve(session).await?;
            return Ok(None);
        }

        let pkce = if session.settings.pkce_disabled {
            None
        } else {
            Some(PkcePair::generate()?)
        };
        session.pending_flow = Some(PendingFlow {
            state: random::generate_state()?,
            code_challenge: pkce.as_ref().map(|p| p.challenge.clone()),
            code_verifier: pkce.map(|p| p.verifier),
        });
        self.set_step(session, FlowStep::ConformanceResolving).await?;

        if let Err(e) = resolver.resolve(session).await {
            tracing::warn!(error = %e, "conformance resolution failed, abandoning authorization");
            session.clear_pending_flow();
            return Err(self.fail(session, e).await);
        }

        let url = authorization_url(session, extra_params)?;
        self.set_step(session, FlowStep::AwaitingAuthorization).await?;

        tracing::info!(
            client_id = %session.settings.client_id,
            authorize_endpoint = %session.urls.authorize_endpoint,
            pkce = !session.settings.pkce_disabled,
            "authorization request ready"
        );

        self.presenter.present(&url).await
    }

    /// Finish authorization from the URL the browser was redirected to.
    ///
    /// Returns `Ok(None)` if `callback_url` carries no authorization code.
    ///
    /// # Errors
    ///
    /// - [`SmartAuthError::AuthorizationDenied`] if the server reported an
    ///   error for the pending request.
    /// - [`SmartAuthError::StateMismatch`] if there is no pending request or
    ///   its `state` differs. The token endpoint is not contacted, and an
    ///   error callback with a foreign `state` leaves the pending request in
    ///   place.
    /// - [`SmartAuthError::TokenExchange`] if the code is rejected.
    pub async fn complete_from_callback(
        &self,
        session: &mut Session,
        callback_url: &str,
    ) -> Result<Option<AuthResult>> {
        let params = match callback::parse_callback(callback_url) {
            Ok(Some(params)) => params,
            Ok(None) => return Ok(None),
            Err(SmartAuthError::AuthorizationDenied {
                error,
                description,
                state,
            }) => {
                if !pending_state_matches(session, state.as_deref()) {
                    tracing::warn!(%error, "error callback does not match the pending request");
                    return Err(SmartAuthError::StateMismatch);
                }
                let e = SmartAuthError::AuthorizationDenied {
                    error,
                    description,
                    state,
                };
                tracing::warn!(error = %e, "authorization server returned an error");
                session.clear_pending_flow();
                return Err(self.fail(session, e).await);
            }
            Err(e) => return Err(e),
        };

        let pending = match session.pending_flow.take() {
            Some(pending) if params.state.as_deref() == Some(pending.state.as_str()) => pending,
            Some(_) => {
                tracing::warn!("callback state does not match the pending request");
                return Err(self.fail(session, SmartAuthError::StateMismatch).await);
            }
            None => {
                tracing::warn!("callback received with no pending authorization request");
                return Err(SmartAuthError::StateMismatch);
            }
        };

        tracing::debug!("state verified, exchanging authorization code");
        self.set_step(session, FlowStep::ExchangingToken).await?;

        match self.exchange(session, &params.code, &pending).await {
            Ok(result) => {
                // Tokens are already stored; a presenter that cannot tidy up
                // does not undo the login.
                if let Err(e) = self.presenter.reset_location(&session.urls.redirect).await {
                    tracing::warn!(error = %e, "failed to reset the presenter location");
                }
                tracing::info!(
                    client_id = %session.settings.client_id,
                    subject = result.subject.as_deref().unwrap_or("-"),
                    "authorization completed"
                );
                Ok(Some(result))
            }
            Err(e) => {
                tracing::warn!(error = %e, "authorization code exchange failed");
                Err(self.fail(session, e).await)
            }
        }
    }

    async fn exchange(
        &self,
        session: &mut Session,
        code: &str,
        pending: &PendingFlow,
    ) -> Result<AuthResult> {
        if session.urls.token_endpoint.is_empty() {
            ConformanceResolver::new(self.transport, self.store)
                .resolve(session)
                .await?;
        }

        let response = TokenEndpoint::new(self.transport, &session.urls.token_endpoint)
            .exchange_code(
                code,
                &session.urls.redirect,
                &session.settings.client_id,
                pending.code_verifier.as_deref(),
            )
            .await?;

        let tokens = response.into_tokens(now_ms());
        let result = AuthResult::from(&tokens);
        session.auth = Some(tokens);
        self.set_step(session, FlowStep::Authenticated).await?;
        Ok(result)
    }

    async fn set_step(&self, session: &mut Session, step: FlowStep) -> Result<()> {
        session.step = step;
        self.store.save(&session.key(), session).await
    }

    /// Mark the session failed and hand `error` back. If the failed session
    /// cannot be saved, that is logged and `error` is still returned.
    async fn fail(&self, session: &mut Session, error: SmartAuthError) -> SmartAuthError {
        if let Err(e) = self.set_step(session, FlowStep::Failed).await {
            tracing::error!(error = %e, "failed to persist the failed session");
        }
        error
    }
}

fn pending_state_matches(session: &Session, state: Option<&str>) -> bool {
    session
        .pending_flow
        .as_ref()
        .is_some_and(|pending| state == Some(pending.state.as_str()))
}

/// Build the authorization URL for the session's pending request.
///
/// # Errors
///
/// [`SmartAuthError::StateMismatch`] if no request is pending;
/// [`SmartAuthError::UrlParse`] if the authorize endpoint is not a URL.
pub fn authorization_url(session: &Session, extra_params: &[(String, String)]) -> Result<String> {
    let pending = session
        .pending_flow
        .as_ref()
        .ok_or(SmartAuthError::StateMismatch)?;
    let settings = &session.settings;

    let mut url = Url::parse(&session.urls.authorize_endpoint)?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("response_type", &settings.response_type);
        query.append_pair("client_id", &settings.client_id);
        query.append_pair("scope", &settings.scope);
        query.append_pair("redirect_uri", &session.urls.redirect);
        query.append_pair("state", &pending.state);

        if let Some(ref aud) = settings.aud {
            query.append_pair("aud", aud);
        }
        if let Some(ref launch) = settings.launch {
            query.append_pair("launch", launch);
        }
        if let Some(ref challenge) = pending.code_challenge {
            query.append_pair("code_challenge", challenge);
            query.append_pair("code_challenge_method", pkce::CHALLENGE_METHOD);
        }
        if let Some(ref language) = settings.language
            && language.chars().count() == 2
        {
            query.append_pair("language", language);
        }
        for (key, value) in extra_params {
            query.append_pair(key, value);
        }
    }

    Ok(url.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::config::ClientConfig;
    use crate::presenter::LogPresenter;
    use crate::session::SessionKey;
    use crate::store::MemorySessionStore;
    use crate::transport::{HttpRequest, HttpResponse};

    /// Answers every request with a token response.
    struct TokenServer;

    #[async_trait]
    impl HttpTransport for TokenServer {
        async fn call(&self, _request: HttpRequest) -> Result<HttpResponse> {
            Ok(HttpResponse {
                status: 200,
                body: r#"{"access_token":"abc","token_type":"Bearer","expires_in":3600}"#
                    .to_string(),
            })
        }
    }

    /// Every save fails.
    struct ReadOnlyStore;

    #[async_trait]
    impl SessionStore for ReadOnlyStore {
        async fn load(&self, _key: &SessionKey) -> Result<Option<Session>> {
            Ok(None)
        }

        async fn save(&self, _key: &SessionKey, _session: &Session) -> Result<()> {
            Err(std::io::Error::other("read-only").into())
        }

        async fn clear(&self, _key: &SessionKey) -> Result<()> {
            Ok(())
        }
    }

    /// Presents nothing and cannot reset its location.
    struct StuckPresenter;

    #[async_trait]
    impl AuthorizationPresenter for StuckPresenter {
        async fn present(&self, _url: &str) -> Result<Option<String>> {
            Ok(None)
        }

        async fn reset_location(&self, _redirect_uri: &str) -> Result<()> {
            Err(std::io::Error::other("window closed").into())
        }
    }

    fn session() -> Session {
        let config = ClientConfig::new(
            "https://fhir.example.org/fhir",
            "my-app",
            "http://127.0.0.1:8400/callback",
        )
        .with_language("de")
        .with_launch("launch-1");
        let mut session = Session::from_config(&config);
        session.urls.authorize_endpoint = "https://auth.example.org/authorize".to_string();
        session.urls.token_endpoint = "https://auth.example.org/token".to_string();
        session.pending_flow = Some(PendingFlow {
            state: "st".to_string(),
            code_verifier: Some("ver".to_string()),
            code_challenge: Some("chal".to_string()),
        });
        session
    }

    fn query(url: &str) -> (Vec<String>, HashMap<String, String>) {
        let url = Url::parse(url).unwrap();
        let keys = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
        let map = url.query_pairs().into_owned().collect();
        (keys, map)
    }

    #[test]
    fn url_has_all_parameters_in_order() {
        let extras = vec![("prompt".to_string(), "login consent".to_string())];
        let url = authorization_url(&session(), &extras).unwrap();
        assert!(url.starts_with("https://auth.example.org/authorize?"));

        let (keys, params) = query(&url);
        assert_eq!(
            keys,
            [
                "response_type",
                "client_id",
                "scope",
                "redirect_uri",
                "state",
                "aud",
                "launch",
                "code_challenge",
                "code_challenge_method",
                "language",
                "prompt"
            ]
        );
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "my-app");
        assert_eq!(params["scope"], "user/*.*");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:8400/callback");
        assert_eq!(params["state"], "st");
        assert_eq!(params["aud"], "https://fhir.example.org/fhir");
        assert_eq!(params["code_challenge"], "chal");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["language"], "de");
        assert_eq!(params["prompt"], "login consent");
    }

    #[test]
    fn pkce_parameters_omitted_without_challenge() {
        let mut session = session();
        if let Some(p) = session.pending_flow.as_mut() {
            p.code_challenge = None;
            p.code_verifier = None;
        }
        let (_, params) = query(&authorization_url(&session, &[]).unwrap());
        assert!(!params.contains_key("code_challenge"));
        assert!(!params.contains_key("code_challenge_method"));
    }

    #[test]
    fn language_only_when_two_letters() {
        for (language, sent) in [("en", true), ("eng", false), ("e", false), ("", false)] {
            let mut session = session();
            session.settings.language = Some(language.to_string());
            let (_, params) = query(&authorization_url(&session, &[]).unwrap());
            assert_eq!(params.contains_key("language"), sent, "{language:?}");
        }
    }

    #[test]
    fn requires_pending_request() {
        let mut session = session();
        session.pending_flow = None;
        assert!(matches!(
            authorization_url(&session, &[]),
            Err(SmartAuthError::StateMismatch)
        ));
    }

    #[tokio::test]
    async fn error_callback_with_foreign_state_is_ignored() {
        let store = MemorySessionStore::new();
        let flow = AuthorizationFlow::new(&TokenServer, &store, &LogPresenter);
        let mut session = session();
        session.step = FlowStep::AwaitingAuthorization;

        let err = flow
            .complete_from_callback(
                &mut session,
                "http://127.0.0.1:8400/callback?error=access_denied&state=other",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SmartAuthError::StateMismatch));
        assert!(session.pending_flow.is_some());
        assert_eq!(session.step, FlowStep::AwaitingAuthorization);

        let err = flow
            .complete_from_callback(&mut session, "http://127.0.0.1:8400/callback?error=access_denied")
            .await
            .unwrap_err();
        assert!(matches!(err, SmartAuthError::StateMismatch));
        assert!(session.pending_flow.is_some());
    }

    #[tokio::test]
    async fn error_callback_for_pending_request_fails_it() {
        let store = MemorySessionStore::new();
        let flow = AuthorizationFlow::new(&TokenServer, &store, &LogPresenter);
        let mut session = session();

        let err = flow
            .complete_from_callback(
                &mut session,
                "http://127.0.0.1:8400/callback?error=access_denied&state=st",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SmartAuthError::AuthorizationDenied { .. }));
        assert!(session.pending_flow.is_none());
        assert_eq!(session.step, FlowStep::Failed);
    }

    #[tokio::test]
    async fn unsaved_failure_still_reports_the_cause() {
        let flow = AuthorizationFlow::new(&TokenServer, &ReadOnlyStore, &LogPresenter);
        let mut session = session();

        let err = flow
            .complete_from_callback(&mut session, "http://127.0.0.1:8400/callback?code=c&state=other")
            .await
            .unwrap_err();
        assert!(matches!(err, SmartAuthError::StateMismatch));
        assert_eq!(session.step, FlowStep::Failed);
    }

    #[tokio::test]
    async fn presenter_reset_failure_keeps_the_login() {
        let store = MemorySessionStore::new();
        let flow = AuthorizationFlow::new(&TokenServer, &store, &StuckPresenter);
        let mut session = session();

        let result = flow
            .complete_from_callback(&mut session, "http://127.0.0.1:8400/callback?code=c&state=st")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.token_type, "Bearer");
        assert_eq!(session.step, FlowStep::Authenticated);

        let stored = store.load(&session.key()).await.unwrap().unwrap();
        assert_eq!(stored.auth.unwrap().access_token, "abc");
    }
}
