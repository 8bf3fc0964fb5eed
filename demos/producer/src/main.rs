//! Demo producer: publishes lines to a broker topic, either read from stdin
//! or synthesized as a fixed-interval firehose (mirrors the original
//! implementation's Twitter-stream demo producer, without the Twitter API
//! dependency).

use std::io::BufRead;
use std::time::Duration;

use clap::Parser;
use quay_core::{Message, ProduceRequest};
use quay_transport::Socket;

/// Publish messages to one topic on a broker.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Broker `host:port` to publish to.
    #[arg(long)]
    broker: String,

    /// Destination topic.
    #[arg(long)]
    topic: String,

    /// Producer id, used to scope idempotent-append deduplication.
    #[arg(long, default_value = "demo-producer")]
    id: String,

    /// Number of synthetic messages to send instead of reading stdin. When
    /// unset, lines are read from stdin until EOF.
    #[arg(long)]
    count: Option<u64>,

    /// Delay between synthetic messages, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Number of transient-failure retries before giving up on one message.
    #[arg(long, default_value_t = 5)]
    max_attempts: usize,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let socket = Socket::new(cli.broker.clone(), "/publish");

    match cli.count {
        Some(count) => run_firehose(&socket, &cli, count).await,
        None => run_stdin(&socket, &cli).await,
    }
}

async fn run_firehose(socket: &Socket, cli: &Cli, count: u64) {
    for sequence in 0..count {
        let payload = format!("firehose message #{sequence}").into_bytes();
        publish_one(socket, cli, sequence as i64, payload).await;
        tokio::time::sleep(Duration::from_millis(cli.interval_ms)).await;
    }
}

async fn run_stdin(socket: &Socket, cli: &Cli) {
    let stdin = std::io::stdin();
    for (sequence, line) in stdin.lock().lines().enumerate() {
        let Ok(line) = line else { break };
        publish_one(socket, cli, sequence as i64, line.into_bytes()).await;
    }
}

async fn publish_one(socket: &Socket, cli: &Cli, sequence: i64, payload: Vec<u8>) {
    let message = Message::new(sequence, payload);
    let request = ProduceRequest {
        id: cli.id.clone(),
        topic: cli.topic.clone(),
        message,
    };

    match socket.send(&request, cli.max_attempts).await {
        Ok(_) => tracing::info!(sequence, "published"),
        Err(err) => tracing::error!(sequence, error = %err, "publish failed"),
    }
}
