//! Leader-side handling of a joining follower: role check, catch-up replay,
//! admission into the in-sync set, then steady-state idle until eviction.

use std::collections::HashMap;
use std::sync::Arc;

use quay_core::{Ack, FollowAck, FollowRequest, Sync};
use quay_storage::Log;
use quay_web::handlers::JsonSocket;
use tokio::sync::Notify;

use crate::config::Role;
use crate::core::{BrokerCore, FollowerHandle};

/// Drive one follower's `/follow` connection from handshake through
/// catch-up to steady state. Returns once the follower disconnects or is
/// evicted.
pub async fn serve_follow(core: Arc<BrokerCore>, mut socket: JsonSocket) {
    let request = match socket.recv_json::<FollowRequest>().await {
        Some(Ok(request)) => request,
        _ => return,
    };

    if core.role().await != Role::Leader || request.hostport == core.own_hostport() {
        let _ = socket.send_json(&Ack::failure()).await;
        return;
    }

    let mut reported_tails = request.offsets;
    let checkpoints = core.checkpoints().await;
    let mut truncate = HashMap::new();
    for (topic, checkpoint) in &checkpoints {
        let reported = reported_tails.get(topic).copied().unwrap_or(0);
        if reported > *checkpoint {
            truncate.insert(topic.clone(), *checkpoint);
            reported_tails.insert(topic.clone(), *checkpoint);
        }
    }

    let Ok(ack) = Ack::success_json(&FollowAck { truncate }) else {
        return;
    };
    if socket.send_json(&ack).await.is_err() {
        return;
    }

    let (mut sink, mut stream) = socket.split();
    let hostport = request.hostport;

    loop {
        if let Err(err) = catch_up(&core, &mut sink, &mut stream, &mut reported_tails).await {
            tracing::warn!(hostport = %hostport, error = %err, "follower catch-up failed");
            return;
        }

        let current = match core.log_sizes().await {
            Ok(sizes) => sizes,
            Err(err) => {
                tracing::error!(error = %err, "failed to read log sizes during catch-up");
                return;
            }
        };

        if tails_match(&reported_tails, &current) {
            let quit = Arc::new(Notify::new());
            core.admit_follower(
                hostport.clone(),
                FollowerHandle {
                    sink,
                    stream,
                    tails: reported_tails.clone(),
                    quit: Arc::clone(&quit),
                },
            )
            .await;
            tracing::info!(hostport = %hostport, "follower caught up and admitted");
            quit.notified().await;
            return;
        }
    }
}

fn tails_match(reported: &HashMap<String, i64>, current: &HashMap<String, i64>) -> bool {
    current
        .iter()
        .all(|(topic, size)| reported.get(topic).copied().unwrap_or(0) == *size)
}

/// Replay every topic the leader knows about, strictly in file order within
/// a topic, from `reported_tails[topic]` up to whatever is on disk right
/// now. New writes that land mid-replay are picked up by the caller's outer
/// loop re-checking `tails_match`.
async fn catch_up(
    core: &Arc<BrokerCore>,
    sink: &mut quay_web::handlers::JsonSink,
    stream: &mut quay_web::handlers::JsonStream,
    reported_tails: &mut HashMap<String, i64>,
) -> Result<(), quay_core::BrokerError> {
    let sizes = core.log_sizes().await?;
    for (topic, size) in &sizes {
        let mut offset = reported_tails.get(topic).copied().unwrap_or(0);
        if offset >= *size {
            continue;
        }
        let mut reader = Log::open(core.log_dir(), topic, offset)?;
        loop {
            let entry = match reader.read_next(topic) {
                Ok(entry) => entry,
                Err(quay_core::BrokerError::EndOfLog) => break,
                Err(err) => return Err(err),
            };
            let sync = Sync {
                topic: topic.clone(),
                message: entry.message,
                request_id: entry.request_id,
            };
            sink.send_json(&sync)
                .await
                .map_err(|err| quay_core::BrokerError::Transport(err.to_string()))?;
            let ack: quay_core::SyncAck = stream
                .recv_json()
                .await
                .ok_or_else(|| quay_core::BrokerError::Transport("connection closed".to_string()))?
                .map_err(|err| quay_core::BrokerError::Transport(err.to_string()))?;
            offset = ack.offset;
        }
        reported_tails.insert(topic.clone(), offset);
    }
    Ok(())
}
