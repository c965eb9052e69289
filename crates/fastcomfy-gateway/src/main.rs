//! # fastcomfy-gateway
//!
//! Gateway binary: loads settings, builds the tenant registry, serves HTTP,
//! and drains everything on Ctrl-C or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fastcomfy_core::logging::init_subscriber;
use fastcomfy_runtime::{TenantRegistry, alerter_from_settings};
use fastcomfy_server::GatewayServer;
use fastcomfy_settings::{GatewaySettings, load_settings_from_path, settings_path};
use tokio::net::TcpListener;
use tracing::{error, info};

/// Multi-tenant ComfyUI dispatch gateway.
#[derive(Parser, Debug)]
#[command(name = "fastcomfy-gateway", about = "Multi-tenant ComfyUI dispatch gateway")]
struct Cli {
    /// Settings file (JSON). Missing means defaults.
    #[arg(long, default_value_os_t = settings_path())]
    config: PathBuf,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Directory of tenant job files (overrides settings).
    #[arg(long)]
    apis_dir: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, settings: &mut GatewaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(dir) = &self.apis_dir {
            settings.apis_dir.0.clone_from(dir);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let mut settings = load_settings_from_path(&args.config)
        .with_context(|| format!("failed to load settings from {}", args.config.display()))?;
    args.apply(&mut settings);
    settings.validate().context("invalid command-line overrides")?;
    init_subscriber(&settings.logging.level);

    let registry = Arc::new(TenantRegistry::from_settings(
        &settings,
        alerter_from_settings(&settings.alerts),
    ));
    let tenants = registry
        .load()
        .await
        .with_context(|| format!("failed to load tenants from {}", settings.apis_dir.display()))?;
    if settings.hot_reload.enabled {
        registry.spawn_hot_reload(settings.hot_reload.interval());
    }

    let mut server = GatewayServer::new(Arc::clone(&registry));
    if settings.storage.enabled {
        server = server.with_artifact_dir(settings.storage.root_dir.clone());
    }
    let server = Arc::new(server);

    let bind = settings.server.bind_addr();
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(addr = %bind, tenants, hot_reload = settings.hot_reload.enabled, "gateway started");

    let mut serving = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(e) = server.serve(listener).await {
                error!(error = %e, "http server failed");
            }
        })
    };

    let pending = tokio::select! {
        signal = shutdown_signal() => {
            signal?;
            vec![serving]
        }
        _ = &mut serving => {
            error!("http server exited unexpectedly");
            Vec::new()
        }
    };

    info!("shutting down");
    let report = server.shutdown().drain(pending, None).await;
    info!(
        http_drained = report.http_drained,
        tenants_stopped = report.tenants_stopped,
        "shutdown complete"
    );
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).context("failed to listen for SIGTERM")?;
        tokio::select! {
            ctrl_c = tokio::signal::ctrl_c() => ctrl_c.context("failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    Ok(())
}
