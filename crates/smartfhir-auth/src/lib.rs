//! SMART-on-FHIR authorization client.
//!
//! Implements the client side of the SMART App Launch authorization code
//! flow with PKCE: capability statement discovery, authorization request
//! construction, callback verification, token exchange and refresh, and a
//! persisted session that survives the browser round trip.
//!
//! # Modules
//!
//! - [`session`]: the persisted [`Session`] record and its key.
//! - [`store`]: [`SessionStore`] persistence (in-memory and encrypted vault).
//! - [`conformance`]: capability statement parsing and endpoint discovery.
//! - [`flow`]: the two halves of the authorization code flow.
//! - [`token`]: token endpoint requests and responses.
//! - [`refresh`]: refresh token grant.
//! - [`gate`]: login checks, logout, token rejection handling.
//! - [`resources`]: authorized FHIR read/create/update/search.
//! - [`presenter`]: showing the authorization URL to the user.
//! - [`transport`]: the HTTP seam and its `reqwest` implementation.
//! - [`client`]: [`SmartClient`], which ties the above together.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use smartfhir_auth::{ClientConfig, LoopbackPresenter, MemorySessionStore, ReqwestTransport, SmartClient};
//!
//! # async fn example() -> smartfhir_auth::Result<()> {
//! let config = ClientConfig::new(
//!     "https://launch.smarthealthit.org/v/r4/fhir",
//!     "my-app",
//!     "http://127.0.0.1:8400/callback",
//! );
//! let mut client = SmartClient::connect(
//!     &config,
//!     Arc::new(ReqwestTransport::new()?),
//!     Arc::new(MemorySessionStore::new()),
//!     Arc::new(LoopbackPresenter::for_redirect_uri(&config.redirect_uri)?),
//! )
//! .await?;
//!
//! client.login(&[]).await?;
//! let _patient = client.resources().read("Patient", "123").await?;
//! # Ok(())
//! # }
//! ```

pub mod callback;
pub mod client;
pub mod config;
pub mod conformance;
pub mod error;
pub mod flow;
pub mod gate;
pub mod pkce;
pub mod presenter;
pub mod random;
pub mod refresh;
pub mod resources;
pub mod session;
pub mod store;
pub mod token;
pub mod transport;

pub use client::{SessionResources, SmartClient};
pub use config::ClientConfig;
pub use conformance::ConformanceResolver;
pub use error::{Result, SmartAuthError};
pub use flow::AuthorizationFlow;
pub use gate::SessionGate;
pub use presenter::{AuthorizationPresenter, LogPresenter, LoopbackPresenter};
pub use refresh::TokenRefresher;
pub use resources::FhirResourceClient;
pub use session::{AuthTokens, FlowStep, PendingFlow, Session, SessionKey};
pub use store::{MemorySessionStore, SessionStore, VaultSessionStore};
pub use token::AuthResult;
pub use transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
