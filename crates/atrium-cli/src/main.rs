//! Atrium CLI
//!
//! Command-line access to the Atrium backend through an authenticated,
//! file-persisted session

use anyhow::{Context, bail};
use atrium_client::{ApiClient, ApiError};
use atrium_core::claims::Claims;
use atrium_core::config::{ClientConfig, expand_tilde};
use atrium_core::session::Session;
use atrium_core::store::FileCredentialStore;
use atrium_core::tenant::TenantId;
use atrium_observability::{ClientMetrics, init_logging};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use reqwest::Method;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "atrium")]
#[command(about = "Atrium - authenticated API client", long_about = None)]
struct Cli {
    /// Path to the configuration file (YAML or TOML)
    #[arg(long, global = true, default_value = "~/.atrium/config.yaml")]
    config: PathBuf,

    /// Print Prometheus metrics to stderr before exiting
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and persist the session
    Login {
        #[arg(long)]
        email: String,

        #[arg(long, env = "ATRIUM_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Log out and remove the persisted session
    Logout,
    /// Send an authenticated request and print the response body
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,

        /// Path relative to the configured base URL
        path: String,

        /// JSON request body
        #[arg(long)]
        body: Option<String>,
    },
    /// Show the persisted session
    Session,
    /// Set or clear the tenant attached to requests
    Tenant {
        /// Tenant id; omit to clear
        id: Option<String>,
    },
}

fn load_config(path: &Path) -> anyhow::Result<ClientConfig> {
    let expanded = expand_tilde(path)?;
    if expanded.exists() {
        ClientConfig::from_file(&expanded)
            .with_context(|| format!("Failed to load config from {}", expanded.display()))
    } else {
        let mut config = ClientConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

fn describe_expiry(label: &str, claims: Option<Claims>) {
    match claims.and_then(|c| c.expires_at()) {
        Some(expires_at) => {
            let state = if expires_at <= Utc::now() {
                "expired"
            } else {
                "valid"
            };
            println!("{label}: {state}, expires {}", format_time(expires_at));
        }
        None => println!("{label}: none"),
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn print_body(body: &[u8]) {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{}", String::from_utf8_lossy(body)),
        },
        Err(_) if body.is_empty() => {}
        Err(_) => println!("{}", String::from_utf8_lossy(body)),
    }
}

fn explain(error: ApiError) -> anyhow::Error {
    match &error {
        ApiError::AuthExpired => anyhow::anyhow!("{error}. Run `atrium login` to sign in again."),
        ApiError::Validation { issues, .. } | ApiError::UnprocessableInput { issues, .. }
            if !issues.is_empty() =>
        {
            let details = issues
                .iter()
                .map(|issue| format!("  {}: {}", issue.field, issue.message))
                .collect::<Vec<_>>()
                .join("\n");
            anyhow::anyhow!("{error}\n{details}")
        }
        _ => anyhow::Error::new(error),
    }
}

async fn run(cli: Cli, config: ClientConfig, metrics: Option<ClientMetrics>) -> anyhow::Result<()> {
    let store = Arc::new(FileCredentialStore::new(&config.session_file)?);
    debug!("Session file: {}", store.path().display());
    let session = Arc::new(Session::builder().store(store).restore()?);

    let mut builder = ApiClient::builder(config, session.clone());
    if let Some(metrics) = metrics {
        builder = builder.observer(Arc::new(metrics));
    }
    let client = builder.build()?;

    match cli.command {
        Commands::Login { email, password } => {
            let payload = client
                .auth()
                .login(&email, &password)
                .await
                .map_err(explain)?;
            info!("Logged in as {}", email);
            match payload.tenant_id {
                Some(tenant) => println!("Logged in as {email} (tenant {tenant})"),
                None => println!("Logged in as {email}"),
            }
        }
        Commands::Logout => {
            client.auth().logout().await.map_err(explain)?;
            println!("Logged out");
        }
        Commands::Request { method, path, body } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("Invalid HTTP method {method:?}"))?;
            let body = match body {
                Some(raw) => {
                    serde_json::from_str::<serde_json::Value>(&raw)
                        .context("--body must be valid JSON")?;
                    Some(Bytes::from(raw))
                }
                None => None,
            };

            let response = client
                .send_raw(method, &path, body)
                .await
                .map_err(explain)?;
            print_body(&response.body);
        }
        Commands::Session => {
            let snapshot = session.snapshot();
            if !snapshot.is_authenticated() {
                println!("Not logged in");
                return Ok(());
            }
            if let Some(subject) = snapshot.access_claims().and_then(|c| c.sub) {
                println!("subject: {subject}");
            }
            match snapshot.tenant() {
                Some(tenant) => println!("tenant: {tenant}"),
                None => println!("tenant: none"),
            }
            describe_expiry("access token", snapshot.access_claims());
            describe_expiry("refresh token", snapshot.refresh_claims());
        }
        Commands::Tenant { id } => {
            if !session.snapshot().is_authenticated() {
                bail!("Not logged in");
            }
            let tenant = id.as_deref().map(TenantId::from_string).transpose()?;
            session.set_tenant(tenant)?;
            match id {
                Some(id) => println!("Tenant set to {id}"),
                None => println!("Tenant cleared"),
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    init_logging(&config.logging)?;

    let metrics = if cli.metrics {
        Some(ClientMetrics::new()?)
    } else {
        None
    };

    let result = run(cli, config, metrics.clone()).await;

    if let Some(metrics) = metrics {
        eprint!("{}", metrics.encode()?);
    }
    result
}
