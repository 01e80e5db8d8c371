//! Authorized FHIR REST calls.
//!
//! Resources are passed around as `serde_json::Value`; this module only
//! knows that they carry `resourceType` and `id`.

use serde_json::Value;
use url::Url;

use crate::error::{Result, SmartAuthError};
use crate::gate::SessionGate;
use crate::session::Session;
use crate::store::SessionStore;
use crate::transport::{HttpMethod, HttpRequest, HttpTransport};

/// Read, create, update and search resources on the session's server.
///
/// Every call checks the login first and does not touch the network when
/// the session is not logged in.
pub struct FhirResourceClient<'a> {
    transport: &'a dyn HttpTransport,
    store: &'a dyn SessionStore,
}

impl<'a> FhirResourceClient<'a> {
    pub fn new(transport: &'a dyn HttpTransport, store: &'a dyn SessionStore) -> Self {
        Self { transport, store }
    }

    /// `GET [base]/{resource_type}/{id}`
    pub async fn read(&self, session: &mut Session, resource_type: &str, id: &str) -> Result<Value> {
        let url = resource_url(session, &[resource_type, id])?;
        self.send(session, HttpRequest::get(url)).await
    }

    /// `POST [base]/{resourceType}`
    pub async fn create(&self, session: &mut Session, resource: &Value) -> Result<Value> {
        let resource_type = field(resource, "resourceType")?;
        let url = resource_url(session, &[resource_type])?;
        let request = HttpRequest::with_body(HttpMethod::Post, url, resource.to_string());
        self.send(session, request).await
    }

    /// `PUT [base]/{resourceType}/{id}`
    pub async fn update(&self, session: &mut Session, resource: &Value) -> Result<Value> {
        let resource_type = field(resource, "resourceType")?;
        let id = field(resource, "id")?;
        let url = resource_url(session, &[resource_type, id])?;
        let request = HttpRequest::with_body(HttpMethod::Put, url, resource.to_string());
        self.send(session, request).await
    }

    /// `GET [base]/{resource_type}?{params}`, returning the Bundle.
    pub async fn search(
        &self,
        session: &mut Session,
        resource_type: &str,
        params: &[(String, String)],
    ) -> Result<Value> {
        let mut url = Url::parse(&resource_url(session, &[resource_type])?)?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        self.send(session, HttpRequest::get(url.to_string())).await
    }

    async fn send(&self, session: &mut Session, request: HttpRequest) -> Result<Value> {
        let gate = SessionGate::new(self.store);
        gate.require_login(session)?;

        let content_type = session.settings.content_type.clone();
        let mut request = request.header("Accept", content_type.as_str());
        if request.body.is_some() {
            request = request.header("Content-Type", content_type.as_str());
        }
        if let Some(authorization) = gate.authorization_header(session) {
            request = request.header("Authorization", authorization);
        }

        let method = request.method;
        let url = request.url.clone();
        let response = self.transport.call(request).await?;
        tracing::debug!(method = method.as_str(), url = %url, status = response.status, "resource request");

        gate.check_response(session, response.status, &response.body)
            .await?;

        match response.status {
            200 | 201 if response.body.trim().is_empty() => Ok(Value::Null),
            200 | 201 => Ok(serde_json::from_str(&response.body)?),
            status => Err(SmartAuthError::ResourceRequest {
                status,
                message: response.body,
            }),
        }
    }
}

fn field<'v>(resource: &'v Value, name: &str) -> Result<&'v str> {
    resource
        .get(name)
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SmartAuthError::ResourceRequest {
            status: 0,
            message: format!("resource has no {name}"),
        })
}

/// `[base]/seg1/seg2/..` with each segment percent-encoded.
fn resource_url(session: &Session, segments: &[&str]) -> Result<String> {
    let mut url = Url::parse(&session.urls.service)?;
    url.path_segments_mut()
        .map_err(|()| SmartAuthError::InvalidConfig {
            reason: format!("service_url cannot be a base: {}", session.urls.service),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
