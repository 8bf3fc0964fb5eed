//! Demo consumer: subscribes to one topic from a given offset and prints
//! each message's payload to stdout as it arrives.

use clap::Parser;
use quay_core::{Message, SubscribeRequest};
use quay_transport::Socket;

/// Stream a topic's messages to stdout.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Broker `host:port` to subscribe to.
    #[arg(long)]
    broker: String,

    /// Topic to stream.
    #[arg(long)]
    topic: String,

    /// Starting byte offset (0 for "from the beginning").
    #[arg(long, default_value_t = 0)]
    offset: i64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let socket = Socket::new(cli.broker.clone(), "/subscribe");

    let request = SubscribeRequest {
        topic: cli.topic.clone(),
        offset: cli.offset,
    };
    if let Err(err) = socket.send_value(&request).await {
        tracing::error!(error = %err, "failed to send subscribe request");
        std::process::exit(1);
    }

    loop {
        match socket.receive::<Message>().await {
            Ok(message) => print_message(&message),
            Err(err) => {
                tracing::error!(error = %err, "subscription ended");
                break;
            }
        }
    }
}

fn print_message(message: &Message) {
    match std::str::from_utf8(&message.payload) {
        Ok(text) => println!("[{}] {text}", message.id),
        Err(_) => println!("[{}] <{} bytes>", message.id, message.payload.len()),
    }
}
