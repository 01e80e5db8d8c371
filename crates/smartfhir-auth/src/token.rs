//! Token endpoint requests.
//!
//! Both grants are `application/x-www-form-urlencoded` POSTs; a 200 response
//! carries the token JSON, anything else is a failed grant.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SmartAuthError};
use crate::session::AuthTokens;
use crate::transport::{HttpRequest, HttpTransport};

/// Subtracted from the advertised lifetime so a token is never presented
/// in the last seconds before it expires.
pub const EXPIRY_SAFETY_MARGIN_MS: i64 = 10_000;

/// Lifetime assumed when the server omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Raw token response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// SMART launch context: the patient the token is bound to.
    #[serde(default)]
    pub patient: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Convert into stored tokens, computing the expiry relative to `now_ms`.
    /// `expires_in` comes from the server, so the arithmetic saturates.
    pub fn into_tokens(self, now_ms: i64) -> AuthTokens {
        let expires_in = self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        AuthTokens {
            access_token: self.access_token,
            token_type: self
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Bearer".to_string()),
            expires_at_ms: now_ms
                .saturating_add(expires_in.saturating_mul(1000))
                .saturating_sub(EXPIRY_SAFETY_MARGIN_MS),
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            subject: self.patient,
            scope: self.scope,
        }
    }
}

/// OAuth error body (RFC 6749 §5.2).
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// What a successful authorization or refresh reports to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthResult {
    pub token_type: String,
    pub expires_at_ms: i64,
    pub subject: Option<String>,
    pub scope: Option<String>,
    pub has_refresh_token: bool,
}

impl From<&AuthTokens> for AuthResult {
    fn from(tokens: &AuthTokens) -> Self {
        Self {
            token_type: tokens.token_type.clone(),
            expires_at_ms: tokens.expires_at_ms,
            subject: tokens.subject.clone(),
            scope: tokens.scope.clone(),
            has_refresh_token: tokens.refresh_token.is_some(),
        }
    }
}

// ---------------------------------------------------------------------------
// TokenEndpoint
// ---------------------------------------------------------------------------

/// Client for one token endpoint URL.
pub struct TokenEndpoint<'a> {
    transport: &'a dyn HttpTransport,
    url: &'a str,
}

impl<'a> TokenEndpoint<'a> {
    pub fn new(transport: &'a dyn HttpTransport, url: &'a str) -> Self {
        Self { transport, url }
    }

    /// Redeem an authorization code.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        client_id: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenResponse> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
            ("client_id", client_id),
            ("code", code),
        ];
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier", verifier));
        }

        tracing::debug!(token_url = %self.url, pkce = code_verifier.is_some(), "exchanging authorization code");
        self.post(params).await
    }

    /// Redeem a refresh token.
    pub async fn refresh(&self, refresh_token: &str, client_id: &str) -> Result<TokenResponse> {
        let params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
        ];

        tracing::debug!(token_url = %self.url, "refreshing access token");
        self.post(params).await
    }

    async fn post(&self, params: Vec<(&str, &str)>) -> Result<TokenResponse> {
        let request = HttpRequest::post_form(self.url, params).header("Accept", "application/json");
        let response = self.transport.call(request).await?;
        parse_token_response(response.status, &response.body)
    }
}

/// Interpret a token endpoint response.
///
/// # Errors
///
/// [`SmartAuthError::TokenExchange`] for any status other than 200, or a 200
/// whose body is not a token response. The message is the OAuth
/// `error_description` (or `error`) when the body is an OAuth error.
pub fn parse_token_response(status: u16, body: &str) -> Result<TokenResponse> {
    if status == 200 {
        return serde_json::from_str(body).map_err(|e| SmartAuthError::TokenExchange {
            status,
            message: format!("malformed token response: {e}"),
        });
    }

    let message = match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(err) => err.error_description.unwrap_or(err.error),
        Err(_) => body.to_string(),
    };
    Err(SmartAuthError::TokenExchange { status, message })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
