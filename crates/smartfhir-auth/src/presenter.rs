//! Authorization UI presenters.
//!
//! After the authorization URL is built, something has to put it in front of
//! the user. An [`AuthorizationPresenter`] either observes the redirect and
//! hands back the callback URL ([`LoopbackPresenter`]), or just shows the
//! URL and lets the callback arrive later through another path
//! ([`LogPresenter`]).

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

use crate::error::{Result, SmartAuthError};

/// Default time to wait for the browser to come back.
pub const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 300;

/// Shows the authorization URL to the user.
#[async_trait]
pub trait AuthorizationPresenter: Send + Sync {
    /// Present `url`. Returns the callback URL if the presenter saw the
    /// redirect, `None` if the callback will be delivered separately.
    async fn present(&self, url: &str) -> Result<Option<String>>;

    /// Put the user back on the redirect location once the flow is done.
    async fn reset_location(&self, _redirect_uri: &str) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LogPresenter
// ---------------------------------------------------------------------------

/// Logs the URL and returns; the callback is handed in later.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPresenter;

#[async_trait]
impl AuthorizationPresenter for LogPresenter {
    async fn present(&self, url: &str) -> Result<Option<String>> {
        tracing::info!(url = %url, "open this URL in your browser to authorize");
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// LoopbackPresenter
// ---------------------------------------------------------------------------

const DONE_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>smartfhir</title>
    <style>
        body { font-family: sans-serif; display: flex; justify-content: center;
               align-items: center; height: 100vh; margin: 0; background: #f5f5f5; }
        .card { text-align: center; padding: 3rem; background: white; border-radius: 12px; }
    </style>
</head>
<body>
    <div class="card">
        <h1>Authorization received</h1>
        <p>You can close this tab and return to the terminal.</p>
    </div>
</body>
</html>"#;

/// Listens on `127.0.0.1:{port}` for the browser's redirect.
#[derive(Debug, Clone)]
pub struct LoopbackPresenter {
    port: u16,
    timeout: Duration,
}

impl LoopbackPresenter {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            timeout: Duration::from_secs(DEFAULT_CALLBACK_TIMEOUT_SECS),
        }
    }

    /// A presenter listening on the port of `redirect_uri`.
    ///
    /// # Errors
    ///
    /// [`SmartAuthError::InvalidConfig`] unless the redirect URI is an
    /// `http` loopback address with an explicit port.
    pub fn for_redirect_uri(redirect_uri: &str) -> Result<Self> {
        let url = Url::parse(redirect_uri)?;
        let loopback = matches!(url.host_str(), Some("127.0.0.1" | "localhost" | "[::1]"));
        match url.port() {
            Some(port) if url.scheme() == "http" && loopback => Ok(Self::new(port)),
            _ => Err(SmartAuthError::InvalidConfig {
                reason: format!("redirect_uri is not an http loopback address with a port: {redirect_uri}"),
            }),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn wait_for_callback(&self, listener: &TcpListener) -> Result<String> {
        loop {
            let (mut stream, peer) = listener.accept().await?;
            tracing::debug!(peer = %peer, "accepted callback connection");

            match read_request_target(&mut stream).await? {
                Some(target) if is_callback_target(&target) => {
                    respond(&mut stream, "200 OK", DONE_HTML).await?;
                    return Ok(format!("http://127.0.0.1:{}{target}", self.port));
                }
                // Favicon requests and the like.
                _ => respond(&mut stream, "404 Not Found", "").await?,
            }
        }
    }
}

#[async_trait]
impl AuthorizationPresenter for LoopbackPresenter {
    async fn present(&self, url: &str) -> Result<Option<String>> {
        let listener = TcpListener::bind(("127.0.0.1", self.port)).await?;
        tracing::info!(port = self.port, "waiting for authorization redirect");
        tracing::info!(url = %url, "open this URL in your browser to authorize");

        let timeout_secs = self.timeout.as_secs();
        match tokio::time::timeout(self.timeout, self.wait_for_callback(&listener)).await {
            Ok(callback) => callback.map(Some),
            Err(_) => Err(SmartAuthError::CallbackTimeout { timeout_secs }),
        }
    }
}

/// Read one request and return its target (`/path?query`).
async fn read_request_target(stream: &mut TcpStream) -> Result<Option<String>> {
    // Redirects are small GET requests.
    let mut buf = [0u8; 8192];
    let n = stream.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);
    Ok(parse_request_target(&request))
}

/// `GET /callback?code=.. HTTP/1.1` gives `/callback?code=..`.
fn parse_request_target(request: &str) -> Option<String> {
    let mut parts = request.lines().next()?.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    (method == "GET" && target.starts_with('/')).then(|| target.to_string())
}

fn is_callback_target(target: &str) -> bool {
    target
        .split_once('?')
        .map(|(_, query)| {
            url::form_urlencoded::parse(query.as_bytes())
                .any(|(k, _)| k == "code" || k == "error")
        })
        .unwrap_or(false)
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) -> Result<()> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_target_parsing() {
        assert_eq!(
            parse_request_target("GET /cb?code=a&state=b HTTP/1.1\r\nHost: x\r\n\r\n").as_deref(),
            Some("/cb?code=a&state=b")
        );
        assert!(parse_request_target("").is_none());
        assert!(parse_request_target("NOTHTTP").is_none());
        assert!(parse_request_target("POST /cb HTTP/1.1").is_none());
    }

    #[test]
    fn callback_target_detection() {
        assert!(is_callback_target("/cb?code=a&state=b"));
        assert!(is_callback_target("/cb?error=access_denied"));
        assert!(!is_callback_target("/favicon.ico"));
        assert!(!is_callback_target("/cb?foo=bar"));
    }

    #[test]
    fn port_from_redirect_uri() {
        let presenter = LoopbackPresenter::for_redirect_uri("http://127.0.0.1:8400/callback").unwrap();
        assert_eq!(presenter.port, 8400);
        assert!(LoopbackPresenter::for_redirect_uri("https://app.example/cb").is_err());
        assert!(LoopbackPresenter::for_redirect_uri("http://localhost/cb").is_err());
    }

    #[tokio::test]
    async fn log_presenter_returns_none() {
        assert!(LogPresenter.present("https://auth.example/authorize").await.unwrap().is_none());
        LogPresenter.reset_location("http://localhost/cb").await.unwrap();
    }

    #[tokio::test]
    async fn loopback_skips_unrelated_requests() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let presenter = LoopbackPresenter::new(port);

        let client = tokio::spawn(async move {
            let mut favicon = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            favicon
                .write_all(b"GET /favicon.ico HTTP/1.1\r\n\r\n")
                .await
                .unwrap();
            let mut buf = Vec::new();
            favicon.read_to_end(&mut buf).await.unwrap();
            assert!(String::from_utf8_lossy(&buf).contains("404"));

            let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            stream
                .write_all(b"GET /callback?code=c42&state=s99 HTTP/1.1\r\n\r\n")
                .await
                .unwrap();
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).await.unwrap();
            let response = String::from_utf8_lossy(&buf);
            assert!(response.contains("200 OK"));
            assert!(response.contains("Authorization received"));
        });

        let callback = presenter.wait_for_callback(&listener).await.unwrap();
        client.await.unwrap();
        assert_eq!(
            callback,
            format!("http://127.0.0.1:{port}/callback?code=c42&state=s99")
        );
    }

    #[tokio::test]
    async fn loopback_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let presenter = LoopbackPresenter::new(port).with_timeout(Duration::from_millis(100));
        match presenter.present("https://auth.example/authorize").await {
            Err(SmartAuthError::CallbackTimeout { timeout_secs }) => assert_eq!(timeout_secs, 0),
            // The freed port may have been taken in between.
            Err(SmartAuthError::Io(_)) => {}
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
