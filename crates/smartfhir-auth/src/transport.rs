//! HTTP transport contract.
//!
//! The flow components never talk to `reqwest` directly; they build an
//! [`HttpRequest`] and hand it to an [`HttpTransport`]. Any status code is a
//! successful `call`; only connection-level failures are errors.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Default request timeout for [`ReqwestTransport`].
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// HTTP methods used by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            headers: Vec::new(),
            body: None,
        }
    }

    /// A `POST` with an `application/x-www-form-urlencoded` body.
    pub fn post_form<'a>(
        url: impl Into<String>,
        params: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();
        Self {
            url: url.into(),
            method: HttpMethod::Post,
            headers: vec![(
                "Content-Type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            )],
            body: Some(body),
        }
    }

    /// A request with a string body and no headers yet.
    pub fn with_body(method: HttpMethod, url: impl Into<String>, body: String) -> Self {
        Self {
            url: url.into(),
            method,
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends requests on behalf of the client.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn call(&self, request: HttpRequest) -> Result<HttpResponse>;
}

// ---------------------------------------------------------------------------
// ReqwestTransport
// ---------------------------------------------------------------------------

/// [`HttpTransport`] over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with the default request timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    /// Build a transport whose requests give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("smartfhir/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn call(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Put => self.client.put(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        tracing::debug!(
            method = request.method.as_str(),
            url = %request.url,
            status,
            "http call completed"
        );

        Ok(HttpResponse { status, body })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn form_body_is_urlencoded() {
        let request = HttpRequest::post_form(
            "https://auth.example/token",
            [
                ("grant_type", "authorization_code"),
                ("redirect_uri", "http://localhost/cb?x=1"),
            ],
        );
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(
            request.body.as_deref(),
            Some("grant_type=authorization_code&redirect_uri=http%3A%2F%2Flocalhost%2Fcb%3Fx%3D1")
        );
        assert!(
            request
                .headers
                .iter()
                .any(|(k, v)| k == "Content-Type" && v == "application/x-www-form-urlencoded")
        );
    }

    #[test]
    fn success_range() {
        let ok = HttpResponse {
            status: 201,
            body: String::new(),
        };
        let not = HttpResponse {
            status: 401,
            body: String::new(),
        };
        assert!(ok.is_success());
        assert!(!not.is_success());
    }

    #[tokio::test]
    async fn reqwest_transport_roundtrip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/echo"))
            .and(header("X-Test", "yes"))
            .and(body_string("a=1"))
            .respond_with(ResponseTemplate::new(418).set_body_string("teapot"))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new().unwrap();
        let response = transport
            .call(
                HttpRequest::with_body(
                    HttpMethod::Post,
                    format!("{}/echo", server.uri()),
                    "a=1".to_string(),
                )
                .header("X-Test", "yes"),
            )
            .await
            .unwrap();

        assert_eq!(response.status, 418);
        assert_eq!(response.body, "teapot");
    }
}
