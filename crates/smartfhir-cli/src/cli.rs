//! CLI argument definitions for smartfhir.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// smartfhir -- SMART-on-FHIR authorization client.
#[derive(Parser)]
#[command(
    name = "smartfhir",
    version,
    about = "smartfhir -- SMART-on-FHIR authorization client",
    long_about = "Authorizes against a SMART-on-FHIR server with the OAuth 2.0 authorization \
                  code flow and PKCE, keeps the session in an encrypted local vault, and makes \
                  authorized FHIR requests."
)]
pub struct Cli {
    /// Configuration file.
    #[arg(long, short, global = true, default_value = "config/smartfhir.toml")]
    pub config: PathBuf,

    #[command(flatten)]
    pub overrides: ClientOverrides,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags that take precedence over the config file and environment.
#[derive(Args, Default)]
pub struct ClientOverrides {
    /// FHIR server base URL.
    #[arg(long, global = true)]
    pub service_url: Option<String>,

    /// OAuth client id.
    #[arg(long, global = true)]
    pub client_id: Option<String>,

    /// Redirect URI registered for the client.
    #[arg(long, global = true)]
    pub redirect_uri: Option<String>,

    /// Requested scope.
    #[arg(long, global = true)]
    pub scope: Option<String>,

    /// Directory for the session vault and its key.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Authorize with the server.
    Login {
        /// Print the authorization URL and exit instead of waiting for the
        /// redirect on the loopback address; finish with `smartfhir callback`.
        #[arg(long)]
        no_listen: bool,

        /// Extra authorization parameter, as key=value. Repeatable.
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },

    /// Complete a login from the URL the browser was redirected to.
    Callback {
        /// The full redirect URL, including `code` and `state`.
        url: String,
    },

    /// Renew the access token with the stored refresh token.
    Refresh,

    /// Show the session state.
    Status,

    /// Print the current access token.
    Token,

    /// Forget the stored tokens.
    Logout {
        /// Delete the whole stored session, not only the tokens.
        #[arg(long)]
        forget: bool,
    },

    /// Fetch the capability statement and show the discovered endpoints.
    Metadata,

    /// Read a resource by type and id.
    Read {
        resource_type: String,
        id: String,
    },

    /// Search resources of a type.
    Search {
        resource_type: String,

        /// Search parameters, as key=value.
        #[arg(value_name = "KEY=VALUE")]
        params: Vec<String>,
    },
}
