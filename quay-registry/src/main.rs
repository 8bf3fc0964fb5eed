//! `quay-registry`: leader/in-sync-set coordinator binary.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use quay_registry::config::RegistryConfig;
use quay_registry::{routes, RegistryCore};

/// Single-coordinator registry for leader election and in-sync tracking.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to a JSON config file. Missing file falls back to defaults.
    #[arg(long, default_value = "registry.json")]
    config: PathBuf,

    /// Override the configured port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = RegistryConfig::load(&cli.config).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "no usable config file, using defaults");
        RegistryConfig::default()
    });

    if let Some(port) = cli.port {
        config.port = port;
    }

    let core = Arc::new(RegistryCore::new(&config));
    let app = routes::router(Arc::clone(&core));

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, port = config.port, "failed to bind listen socket");
            std::process::exit(1);
        }
    };

    tracing::info!(port = config.port, "registry listening");
    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!(error = %err, "server exited");
        std::process::exit(1);
    }
}
