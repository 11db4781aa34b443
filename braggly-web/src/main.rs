//! Braggly gateway (braggly-web) - Main entry point
//!
//! Serves the page shell, proxies the backend API and runs the COD import
//! polling sessions.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use braggly_common::config::{ConfigOverrides, GatewayConfig};
use braggly_web::{build_router, i18n::Translations, AppState};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for braggly-web
#[derive(Parser, Debug)]
#[command(name = "braggly-web")]
#[command(about = "HTTP gateway for the Braggly XRD platform")]
#[command(version)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base URL of the Braggly backend
    #[arg(long)]
    backend_url: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    bind: Option<String>,

    /// Directory holding `{locale}/common.json` files
    #[arg(long)]
    locales_dir: Option<PathBuf>,

    /// Report translation keys missing from each locale, then exit
    #[arg(long)]
    check_translations: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = GatewayConfig::resolve(ConfigOverrides {
        config_path: args.config,
        backend_url: args.backend_url,
        bind_address: args.bind,
        port: args.port,
        locales_dir: args.locales_dir,
    })
    .context("Failed to resolve configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_new(&config.log_level)
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting braggly-web v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE"),
    );

    if args.check_translations {
        return check_translations(&config).await;
    }

    info!("Backend: {}", config.backend_url);
    info!("Locales: {}", config.locales_dir.display());
    if config.stripe.secret_key.is_none() {
        warn!("Stripe secret key not configured; payment endpoints will fail");
    }
    if !config.google.is_complete() {
        warn!("Google OAuth not configured; Google sign-in is disabled");
    }

    let addr = format!("{}:{}", config.bind_address, config.port);
    let session_idle = config.polling.session_idle();
    let state = AppState::new(config).context("Failed to initialize application state")?;
    let sessions = state.sessions.clone();
    let reaper = CancellationToken::new();
    sessions.spawn_reaper(session_idle, reaper.clone());
    let app = build_router(state);

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    reaper.cancel();
    sessions.close_all().await;
    info!("Server shutdown complete");
    Ok(())
}

/// `--check-translations`: fail when any locale lacks keys of the default one
async fn check_translations(config: &GatewayConfig) -> Result<()> {
    let translations = Translations::new(&config.locales_dir, config.default_locale.clone());
    let report = translations
        .missing_keys()
        .await
        .context("Failed to check translations")?;

    if report.is_empty() {
        info!("All locales complete relative to '{}'", config.default_locale);
        return Ok(());
    }

    for (locale, keys) in &report {
        warn!(locale = %locale, missing = keys.len(), "Missing keys: {}", keys.join(", "));
    }
    bail!("{} locale(s) have missing translation keys", report.len())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
