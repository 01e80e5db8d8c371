//! Login state checks and logout.

use crate::error::{Result, SmartAuthError};
use crate::session::{FlowStep, Session, now_ms};
use crate::store::SessionStore;

/// Phrases resource servers use for a rejected or expired access token.
const TOKEN_REJECTION_MARKERS: &[&str] = &[
    "invalid_token",
    "invalid token",
    "expired token",
    "token expired",
    "token has expired",
];

/// Answers "may this session call the resource server?" and ends sessions.
pub struct SessionGate<'a> {
    store: &'a dyn SessionStore,
}

impl<'a> SessionGate<'a> {
    pub fn new(store: &'a dyn SessionStore) -> Self {
        Self { store }
    }

    /// Logged in: a non-empty access token that has not expired. Never true
    /// for servers that need no authorization, where there is nothing to be
    /// logged in to.
    pub fn is_logged_in(&self, session: &Session) -> bool {
        !session.settings.no_auth_required
            && session
                .auth
                .as_ref()
                .is_some_and(|auth| auth.is_valid_at(now_ms()))
    }

    /// The access token, if logged in.
    pub fn access_token<'s>(&self, session: &'s Session) -> Option<&'s str> {
        session
            .auth
            .as_ref()
            .filter(|auth| auth.is_valid_at(now_ms()))
            .map(|auth| auth.access_token.as_str())
    }

    /// `Authorization` header value, e.g. `Bearer abc`, if logged in.
    pub fn authorization_header(&self, session: &Session) -> Option<String> {
        let token = self.access_token(session)?;
        let token_type = session.auth.as_ref().map_or("Bearer", |a| a.token_type.as_str());
        Some(format!("{token_type} {token}"))
    }

    /// Fail with [`SmartAuthError::NotAuthenticated`] unless logged in or
    /// the server needs no authorization.
    pub fn require_login(&self, session: &Session) -> Result<()> {
        if session.settings.no_auth_required || self.is_logged_in(session) {
            Ok(())
        } else {
            Err(SmartAuthError::NotAuthenticated)
        }
    }

    /// Forget tokens and any pending request. No network call is made.
    pub async fn logout(&self, session: &mut Session) -> Result<()> {
        session.auth = None;
        session.pending_flow = None;
        session.step = FlowStep::Idle;
        self.store.save(&session.key(), session).await?;
        tracing::info!(client_id = %session.settings.client_id, "logged out");
        Ok(())
    }

    /// Inspect a resource server response. A 401, or an error body saying
    /// the token is invalid or expired, logs the session out.
    ///
    /// # Errors
    ///
    /// [`SmartAuthError::Unauthorized`] when the token was rejected.
    pub async fn check_response(&self, session: &mut Session, status: u16, body: &str) -> Result<()> {
        if !is_token_rejection(status, body) {
            return Ok(());
        }

        tracing::warn!(status, "resource server rejected the access token");
        self.logout(session).await?;
        Err(SmartAuthError::Unauthorized {
            status,
            message: body.to_string(),
        })
    }
}

fn is_token_rejection(status: u16, body: &str) -> bool {
    if status == 401 {
        return true;
    }
    if status < 400 {
        return false;
    }
    let body = body.to_ascii_lowercase();
    TOKEN_REJECTION_MARKERS.iter().any(|m| body.contains(m))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::session::{AuthTokens, PendingFlow};
    use crate::store::MemorySessionStore;

    fn session(expires_at_ms: i64) -> Session {
        let mut session = Session::from_config(&ClientConfig::new(
            "https://fhir.example.org/fhir",
            "app",
            "http://localhost/cb",
        ));
        session.step = FlowStep::Authenticated;
        session.auth = Some(AuthTokens {
            access_token: "abc".to_string(),
            token_type: "Bearer".to_string(),
            expires_at_ms,
            refresh_token: Some("r".to_string()),
            subject: Some("Patient/1".to_string()),
            scope: None,
        });
        session
    }

    fn later() -> i64 {
        now_ms() + 60_000
    }

    #[test]
    fn logged_in_with_fresh_token() {
        let store = MemorySessionStore::new();
        let gate = SessionGate::new(&store);
        let session = session(later());
        assert!(gate.is_logged_in(&session));
        assert_eq!(gate.access_token(&session), Some("abc"));
        assert_eq!(gate.authorization_header(&session).as_deref(), Some("Bearer abc"));
        gate.require_login(&session).unwrap();
    }

    #[test]
    fn expired_token_is_not_logged_in() {
        let store = MemorySessionStore::new();
        let gate = SessionGate::new(&store);
        let session = session(now_ms() - 1);
        assert!(!gate.is_logged_in(&session));
        assert!(gate.access_token(&session).is_none());
        assert!(matches!(
            gate.require_login(&session),
            Err(SmartAuthError::NotAuthenticated)
        ));
    }

    #[test]
    fn open_server_is_never_logged_in_but_needs_no_login() {
        let store = MemorySessionStore::new();
        let gate = SessionGate::new(&store);
        let mut session = session(0);
        session.auth = None;
        session.settings.no_auth_required = true;
        assert!(!gate.is_logged_in(&session));
        assert!(gate.access_token(&session).is_none());
        gate.require_login(&session).unwrap();

        session.auth = Some(AuthTokens {
            access_token: "abc".to_string(),
            token_type: "Bearer".to_string(),
            expires_at_ms: later(),
            refresh_token: None,
            subject: None,
            scope: None,
        });
        assert!(!gate.is_logged_in(&session));
    }

    #[tokio::test]
    async fn logout_clears_everything_and_persists() {
        let store = MemorySessionStore::new();
        let gate = SessionGate::new(&store);
        let mut session = session(later());
        session.pending_flow = Some(PendingFlow {
            state: "s".to_string(),
            code_verifier: None,
            code_challenge: None,
        });

        gate.logout(&mut session).await.unwrap();
        assert!(!gate.is_logged_in(&session));
        assert!(gate.access_token(&session).is_none());
        assert!(session.pending_flow.is_none());
        assert_eq!(session.step, FlowStep::Idle);

        let stored = store.load(&session.key()).await.unwrap().unwrap();
        assert!(stored.auth.is_none());
    }

    #[tokio::test]
    async fn unauthorized_response_logs_out() {
        let store = MemorySessionStore::new();
        let gate = SessionGate::new(&store);
        let mut session = session(later());

        let err = gate
            .check_response(&mut session, 401, "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, SmartAuthError::Unauthorized { status: 401, .. }));
        assert!(session.auth.is_none());
    }

    #[tokio::test]
    async fn expired_token_body_logs_out() {
        let store = MemorySessionStore::new();
        let gate = SessionGate::new(&store);
        let mut session = session(later());

        let err = gate
            .check_response(&mut session, 400, r#"{"error":"Invalid Token"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, SmartAuthError::Unauthorized { status: 400, .. }));
    }

    #[tokio::test]
    async fn other_responses_pass() {
        let store = MemorySessionStore::new();
        let gate = SessionGate::new(&store);
        let mut session = session(later());

        gate.check_response(&mut session, 200, "invalid token text in a resource")
            .await
            .unwrap();
        gate.check_response(&mut session, 404, "not found").await.unwrap();
        assert!(gate.is_logged_in(&session));
    }
}
