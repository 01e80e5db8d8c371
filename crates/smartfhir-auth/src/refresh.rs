//! Refresh token grant.

use crate::conformance::ConformanceResolver;
use crate::error::{Result, SmartAuthError};
use crate::session::{FlowStep, Session, now_ms};
use crate::store::SessionStore;
use crate::token::{AuthResult, TokenEndpoint};
use crate::transport::HttpTransport;

/// Renews a session's access token with its refresh token.
pub struct TokenRefresher<'a> {
    transport: &'a dyn HttpTransport,
    store: &'a dyn SessionStore,
}

impl<'a> TokenRefresher<'a> {
    pub fn new(transport: &'a dyn HttpTransport, store: &'a dyn SessionStore) -> Self {
        Self { transport, store }
    }

    /// Exchange the stored refresh token for new tokens.
    ///
    /// Returns `Ok(None)` for servers that need no authorization.
    ///
    /// # Errors
    ///
    /// - [`SmartAuthError::InvalidRefreshToken`] if no refresh token is
    ///   stored. Nothing is sent.
    /// - [`SmartAuthError::TokenExchange`] if the server rejects the grant.
    ///   The stored tokens are left as they were.
    pub async fn refresh(&self, session: &mut Session) -> Result<Option<AuthResult>> {
        if session.settings.no_auth_required {
            return Ok(None);
        }

        let refresh_token = session
            .auth
            .as_ref()
            .and_then(|auth| auth.refresh_token.clone())
            .filter(|token| !token.is_empty())
            .ok_or(SmartAuthError::InvalidRefreshToken)?;

        if session.urls.token_endpoint.is_empty() {
            ConformanceResolver::new(self.transport, self.store)
                .resolve(session)
                .await?;
        }

        let response = TokenEndpoint::new(self.transport, &session.urls.token_endpoint)
            .refresh(&refresh_token, &session.settings.client_id)
            .await?;

        let previous_subject = session.auth.as_ref().and_then(|a| a.subject.clone());
        let mut tokens = response.into_tokens(now_ms());
        if tokens.subject.is_none() {
            tokens.subject = previous_subject;
        }
        // Servers that do not rotate refresh tokens omit it from the response.
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token);
        }

        let result = AuthResult::from(&tokens);
        session.auth = Some(tokens);
        session.step = FlowStep::Authenticated;
        self.store.save(&session.key(), session).await?;

        tracing::info!(client_id = %session.settings.client_id, "access token refreshed");
        Ok(Some(result))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
