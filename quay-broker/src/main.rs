//! `quay-broker`: leader/follower message broker binary.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use quay_broker::config::{BrokerConfig, Role};
use quay_broker::core::BrokerCore;
use quay_broker::{leader_session, routes};
use quay_transport::Socket;

/// Leader/follower broker for one or more topic logs.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to a JSON config file.
    #[arg(long, default_value = "broker.json")]
    config: PathBuf,

    /// Override the configured port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the configured log directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Override the configured starting role.
    #[arg(long, value_enum)]
    role: Option<CliRole>,

    /// Override the configured registry address.
    #[arg(long)]
    register: Option<String>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum CliRole {
    Leader,
    Follower,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = match BrokerConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "failed to load broker config");
            std::process::exit(1);
        }
    };

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(log_dir) = cli.log_dir {
        config.log_dir = log_dir;
    }
    if let Some(role) = cli.role {
        config.role = match role {
            CliRole::Leader => Role::Leader,
            CliRole::Follower => Role::Follower,
        };
    }
    if let Some(register) = cli.register {
        config.register = register;
    }

    if let Err(err) = std::fs::create_dir_all(&config.log_dir) {
        tracing::error!(error = %err, dir = %config.log_dir.display(), "log directory unusable");
        std::process::exit(1);
    }

    let hostport = config.hostport();
    let role = config.role;
    let core = Arc::new(BrokerCore::new(&config));

    let app = routes::router(Arc::clone(&core));
    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, port = config.port, "failed to bind listen socket");
            std::process::exit(1);
        }
    };

    tokio::spawn(run_role_loop(Arc::clone(&core), role));

    tracing::info!(%hostport, ?role, "broker listening");
    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!(error = %err, "server exited");
        std::process::exit(1);
    }
}

/// Establish the broker's initial role and, while a follower, keep
/// reconnecting to whatever leader the registry currently reports.
async fn run_role_loop(core: Arc<BrokerCore>, role: Role) {
    match role {
        Role::Leader => {
            if let Err(err) = core.become_leader().await {
                tracing::error!(error = %err, "failed to register as leader");
            }
        }
        Role::Follower => loop {
            let leader_hostport = match discover_leader(&core).await {
                Ok(hostport) => hostport,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to discover leader, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(
                        quay_core::MAX_RETRY_INTERVAL_MS,
                    ))
                    .await;
                    continue;
                }
            };
            core.become_follower(Some(leader_hostport.clone())).await;
            if let Err(err) = leader_session::run(Arc::clone(&core), &leader_hostport).await {
                tracing::warn!(leader = %leader_hostport, error = %err, "leader link lost, rediscovering");
            }
        },
    }
}

/// Ask the registry's `/follow` redirector for the current leader. This is
/// a one-shot peek, not a call through `Socket::send`'s retry/redirect
/// machinery: that machinery would re-dial the returned hostport on this
/// same `/follow` path with the same (empty) body, which is not the real
/// follow handshake `leader_session::run` performs next.
async fn discover_leader(core: &Arc<BrokerCore>) -> Result<String, quay_transport::TransportError> {
    let socket = Socket::new(core.registry_hostport().to_string(), "/follow");
    socket.send_value(&()).await?;
    let ack: quay_core::Ack = socket.receive().await?;
    match ack.status {
        quay_core::Status::Redirect => Ok(String::from_utf8_lossy(&ack.payload).into_owned()),
        _ => Err(quay_transport::TransportError::Transient(
            "registry has no leader yet".to_string(),
        )),
    }
}
