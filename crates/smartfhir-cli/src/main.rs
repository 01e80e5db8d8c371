//! CLI entry point for smartfhir.
//!
//! This binary provides the `smartfhir` command: log in to a SMART-on-FHIR
//! server, inspect and renew the stored session, and make authorized FHIR
//! requests with it.

mod cli;
mod config;
mod helpers;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use smartfhir_auth::{
    AuthResult, AuthorizationPresenter, LogPresenter, LoopbackPresenter, ReqwestTransport,
    SmartClient, VaultSessionStore,
};
use smartfhir_vault::{FileKeychain, KeychainProvider, Vault};
use tracing::info;

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::helpers::{format_expiry, init_tracing, parse_key_values};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("info");

    let cli = Cli::parse();
    let config = config::load(&cli.config, &cli.overrides)?;

    match cli.command {
        Commands::Login { no_listen, params } => cmd_login(&config, no_listen, &params).await,
        Commands::Callback { url } => cmd_callback(&config, &url).await,
        Commands::Refresh => cmd_refresh(&config).await,
        Commands::Status => cmd_status(&config).await,
        Commands::Token => cmd_token(&config).await,
        Commands::Logout { forget } => cmd_logout(&config, forget).await,
        Commands::Metadata => cmd_metadata(&config).await,
        Commands::Read { resource_type, id } => cmd_read(&config, &resource_type, &id).await,
        Commands::Search {
            resource_type,
            params,
        } => cmd_search(&config, &resource_type, &params).await,
    }
}

/// Open the vault and connect a client with the given presenter.
async fn connect(
    config: &AppConfig,
    presenter: Arc<dyn AuthorizationPresenter>,
) -> Result<SmartClient> {
    let data_dir = &config.storage.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;

    let key = FileKeychain::new(config.storage.key_path())
        .load_or_create_master_key()
        .context("failed to load the vault master key")?;
    let vault = Vault::open(config.storage.database_path(), &key)
        .context("failed to open the session vault")?;

    let client = SmartClient::connect(
        &config.client,
        Arc::new(ReqwestTransport::new()?),
        Arc::new(VaultSessionStore::new(vault)),
        presenter,
    )
    .await?;
    Ok(client)
}

fn print_result(result: &AuthResult) {
    println!("  logged in");
    println!("    token type: {}", result.token_type);
    println!("    expires:    {}", format_expiry(result.expires_at_ms));
    if let Some(ref subject) = result.subject {
        println!("    patient:    {subject}");
    }
    if let Some(ref scope) = result.scope {
        println!("    scope:      {scope}");
    }
    println!(
        "    refresh:    {}",
        if result.has_refresh_token { "yes" } else { "no" }
    );
}

// ---------------------------------------------------------------------------
// Subcommands: authorization
// ---------------------------------------------------------------------------

async fn cmd_login(config: &AppConfig, no_listen: bool, params: &[String]) -> Result<()> {
    let params = parse_key_values(params)?;
    let presenter: Arc<dyn AuthorizationPresenter> = if no_listen {
        Arc::new(LogPresenter)
    } else {
        Arc::new(LoopbackPresenter::for_redirect_uri(&config.client.redirect_uri)?)
    };

    let mut client = connect(config, presenter).await?;
    match client.login(&params).await? {
        Some(result) => print_result(&result),
        None if config.client.no_auth_required => {
            println!("  server requires no authorization");
        }
        None => {
            println!("  after authorizing, run:");
            println!("    smartfhir callback '<redirect url>'");
        }
    }
    Ok(())
}

async fn cmd_callback(config: &AppConfig, url: &str) -> Result<()> {
    let mut client = connect(config, Arc::new(LogPresenter)).await?;
    match client.handle_callback(url).await? {
        Some(result) => print_result(&result),
        None => anyhow::bail!("'{url}' carries no authorization code"),
    }
    Ok(())
}

async fn cmd_refresh(config: &AppConfig) -> Result<()> {
    let mut client = connect(config, Arc::new(LogPresenter)).await?;
    match client.refresh().await? {
        Some(result) => print_result(&result),
        None => println!("  server requires no authorization"),
    }
    Ok(())
}

async fn cmd_logout(config: &AppConfig, forget: bool) -> Result<()> {
    let mut client = connect(config, Arc::new(LogPresenter)).await?;
    if forget {
        client.forget().await?;
        println!("  session deleted");
    } else {
        client.logout().await?;
        println!("  logged out");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommands: inspection
// ---------------------------------------------------------------------------

async fn cmd_status(config: &AppConfig) -> Result<()> {
    let client = connect(config, Arc::new(LogPresenter)).await?;
    let session = client.session();

    println!();
    println!("  smartfhir v{}", env!("CARGO_PKG_VERSION"));
    println!("    server:     {}", session.urls.service);
    println!("    client id:  {}", session.settings.client_id);
    println!("    step:       {}", session.step);
    let logged_in = if session.settings.no_auth_required {
        "not required"
    } else if client.is_logged_in() {
        "yes"
    } else {
        "no"
    };
    println!("    logged in:  {logged_in}");
    if let Some(ref auth) = session.auth {
        println!("    expires:    {}", format_expiry(auth.expires_at_ms));
        if let Some(ref subject) = auth.subject {
            println!("    patient:    {subject}");
        }
    }
    if session.pending_flow.is_some() {
        println!("    pending:    authorization request awaiting callback");
    }
    println!();
    Ok(())
}

async fn cmd_token(config: &AppConfig) -> Result<()> {
    let client = connect(config, Arc::new(LogPresenter)).await?;
    let token = client
        .access_token()
        .context("not logged in; run `smartfhir login`")?;
    println!("{token}");
    Ok(())
}

async fn cmd_metadata(config: &AppConfig) -> Result<()> {
    let mut client = connect(config, Arc::new(LogPresenter)).await?;
    client.resolve_conformance().await?;
    let session = client.session();

    println!();
    println!("  capability statement: {}", session.urls.conformance);
    println!(
        "    fhir version:  {}",
        session.settings.fhir_version.as_deref().unwrap_or("unknown")
    );
    println!("    authorize:     {}", session.urls.authorize_endpoint);
    println!("    token:         {}", session.urls.token_endpoint);
    let types: Vec<&str> = session
        .settings
        .supported_resource_types
        .iter()
        .map(String::as_str)
        .collect();
    println!("    resources:     {}", types.join(", "));
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommands: resources
// ---------------------------------------------------------------------------

async fn cmd_read(config: &AppConfig, resource_type: &str, id: &str) -> Result<()> {
    let mut client = connect(config, Arc::new(LogPresenter)).await?;
    let resource = client.resources().read(resource_type, id).await?;
    println!("{}", serde_json::to_string_pretty(&resource)?);
    Ok(())
}

async fn cmd_search(config: &AppConfig, resource_type: &str, params: &[String]) -> Result<()> {
    let params = parse_key_values(params)?;
    let mut client = connect(config, Arc::new(LogPresenter)).await?;
    let bundle = client.resources().search(resource_type, &params).await?;

    let total = bundle.get("total").and_then(|t| t.as_u64());
    info!(resource_type, total, "search completed");
    println!("{}", serde_json::to_string_pretty(&bundle)?);
    Ok(())
}
