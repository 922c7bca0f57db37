//! S3-compatible object storage gateway.
//!
//! `main` parses CLI flags, builds a layered [`Config`] (file, environment, CLI — later
//! sources win), constructs the configured [`StorageProvider`], assembles the axum
//! `Router`, and serves with graceful shutdown.

mod auth_layer;
mod canonical;
mod dispatch;
mod response;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use auth_layer::{AuthState, auth_layer};
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::{Router, middleware};
use clap::Parser;
use dispatch::{AppState, health, route_request};
use s3gate_auth::Credentials;
use s3gate_cache::Md5Cache;
use s3gate_common::Config;
use s3gate_common::config::BackendKind;
use s3gate_local::LocalProvider;
use s3gate_provider::StorageProvider;
use s3gate_remote::{FakeRemoteClient, RemoteClient, RemoteProvider};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "s3gate-server")]
#[command(about = "S3-compatible object storage gateway")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML), layered under environment variables and CLI flags.
    #[arg(short, long)]
    config: Option<String>,

    /// Address the S3 API listens on.
    #[arg(short, long)]
    listen: Option<String>,

    /// Storage backend: "local" or "remote".
    #[arg(long)]
    backend: Option<String>,

    /// Root directory for the local storage backend.
    #[arg(long)]
    data_root: Option<String>,

    /// MD5 side-cache database path (remote backend only).
    #[arg(long)]
    cache_path: Option<String>,

    #[arg(long)]
    access_key_id: Option<String>,

    #[arg(long)]
    secret_access_key: Option<String>,

    #[arg(long)]
    region: Option<String>,

    /// Skip signature verification entirely (development only).
    #[arg(long, default_value_t = false)]
    no_auth: bool,

    /// The gateway's own hostname, used to recognize virtual-host-style bucket addressing.
    #[arg(long)]
    base_host: Option<String>,

    /// Log level (overridden by RUST_LOG if set).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut builder = config::Config::builder();

    if let Some(path) = &args.config {
        builder = builder.add_source(config::File::with_name(path).required(false));
    }
    builder = builder.add_source(config::Environment::with_prefix("S3GATE").separator("__"));

    let layered = builder.build().context("failed to load configuration sources")?;
    let mut config = Config::default();

    if let Ok(v) = layered.get::<String>("server.bind_addr") {
        config.server.bind_addr = v.parse().context("invalid server.bind_addr")?;
    }
    if let Ok(v) = layered.get::<bool>("server.no_auth") {
        config.server.no_auth = v;
    }
    if let Ok(v) = layered.get::<String>("backend") {
        config.backend = parse_backend(&v)?;
    }
    if let Ok(v) = layered.get::<String>("local.data_root") {
        config.local.data_root = v.into();
    }
    if let Ok(v) = layered.get::<String>("remote.endpoint") {
        config.remote.endpoint = v;
    }
    if let Ok(v) = layered.get::<String>("remote.api_key") {
        config.remote.api_key = v;
    }
    if let Ok(v) = layered.get::<String>("remote.workspace_id") {
        config.remote.workspace_id = v;
    }
    if let Ok(v) = layered.get::<String>("cache.path") {
        config.cache.path = v.into();
    }
    if let Ok(v) = layered.get::<String>("credentials.access_key_id") {
        config.credentials.access_key_id = v;
    }
    if let Ok(v) = layered.get::<String>("credentials.secret_access_key") {
        config.credentials.secret_access_key = v;
    }
    if let Ok(v) = layered.get::<String>("credentials.region") {
        config.credentials.region = v;
    }

    apply_cli_overrides(&mut config, args)?;

    Ok(config)
}

fn parse_backend(value: &str) -> Result<BackendKind> {
    match value.to_lowercase().as_str() {
        "local" => Ok(BackendKind::Local),
        "remote" => Ok(BackendKind::Remote),
        other => Err(anyhow::anyhow!("unknown backend '{other}', expected 'local' or 'remote'")),
    }
}

/// CLI flags take precedence over the config file and environment (§6).
fn apply_cli_overrides(config: &mut Config, args: &Args) -> Result<()> {
    if let Some(v) = &args.listen {
        config.server.bind_addr = v.parse().context("invalid --listen address")?;
    }
    if args.no_auth {
        config.server.no_auth = true;
    }
    if let Some(v) = &args.backend {
        config.backend = parse_backend(v)?;
    }
    if let Some(v) = &args.data_root {
        config.local.data_root = v.into();
    }
    if let Some(v) = &args.cache_path {
        config.cache.path = v.into();
    }
    if let Some(v) = &args.access_key_id {
        config.credentials.access_key_id = v.clone();
    }
    if let Some(v) = &args.secret_access_key {
        config.credentials.secret_access_key = v.clone();
    }
    if let Some(v) = &args.region {
        config.credentials.region = v.clone();
    }
    Ok(())
}

fn build_provider(config: &Config) -> Result<Arc<dyn StorageProvider>> {
    match config.backend {
        BackendKind::Local => {
            info!("Storage backend: local ({})", config.local.data_root.display());
            Ok(Arc::new(LocalProvider::new(config.local.data_root.clone())))
        }
        BackendKind::Remote => {
            info!("Storage backend: remote (workspace {})", config.remote.workspace_id);
            let cache = Arc::new(Md5Cache::open(&config.cache.path).context("failed to open MD5 cache")?);
            // No concrete vendor API is named for this gateway's remote backend; the
            // in-memory fake stands in for a real adapter implementing `RemoteClient`
            // until one is wired in here (see DESIGN.md).
            let client: Arc<dyn RemoteClient> = Arc::new(FakeRemoteClient::new());
            Ok(Arc::new(RemoteProvider::new(client, cache, config.remote.workspace_id.clone())))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| args.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting s3gate-server");

    let config = load_config(&args)?;
    let provider = build_provider(&config)?;
    let credentials = Credentials::from(config.credentials.clone());

    let state = Arc::new(AppState { provider, base_host: args.base_host.clone() });

    // Single-part uploads only (§1 Non-goals exclude multipart); bound the body so a
    // malicious client can't force unbounded buffering in `decode_body`.
    let body_limit = DefaultBodyLimit::max(5 * 1024 * 1024 * 1024);

    let mut router = Router::new().route("/health", get(health)).fallback(route_request).with_state(state);

    if config.server.no_auth {
        info!("Authentication is DISABLED (--no-auth)");
    } else {
        info!("Authentication is ENABLED");
        let auth_state = Arc::new(AuthState { credentials, base_host: args.base_host.clone() });
        router = router.layer(middleware::from_fn_with_state(auth_state, auth_layer));
    }

    let app = router.layer(body_limit).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.server.bind_addr;
    info!("Listening on {}", addr);
    let listener = TcpListener::bind(addr).await.with_context(|| format!("failed to bind {addr}"))?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        })
        .await?;

    info!("s3gate-server shut down gracefully");
    Ok(())
}
