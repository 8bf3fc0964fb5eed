//! Follower-side handling of the live connection to the current leader:
//! receive `Sync`, persist, ack, wake local subscribers.

use std::collections::HashMap;
use std::sync::Arc;

use quay_core::{Ack, FollowAck, FollowRequest, LogEntry, Status, Sync, SyncAck};
use quay_storage::truncate;
use quay_transport::{Socket, TransportError};

use crate::core::BrokerCore;

/// Dial `leader_hostport`'s `/follow` endpoint, apply any truncation it
/// demands, then loop receiving and persisting `Sync` messages until the
/// connection fails. Returns on any error so the caller can rediscover the
/// leader via the registry and retry.
pub async fn run(core: Arc<BrokerCore>, leader_hostport: &str) -> Result<(), TransportError> {
    let socket = Socket::new(leader_hostport.to_string(), "/follow");

    let offsets = local_tails(&core).await.map_err(|err| TransportError::Transient(err.to_string()))?;
    let request = FollowRequest {
        offsets,
        hostport: core.own_hostport(),
    };

    let payload = socket.send(&request, 1).await?;
    let ack = Ack {
        status: Status::Success,
        payload,
    };
    let follow_ack: FollowAck = ack
        .payload_json()
        .map_err(|err| TransportError::Transient(err.to_string()))?;

    for (topic, offset) in follow_ack.truncate {
        truncate(core.log_dir(), &topic, offset)
            .map_err(|err| TransportError::Transient(err.to_string()))?;
    }

    loop {
        let sync: Sync = socket.receive().await?;
        let entry = LogEntry {
            message: sync.message,
            request_id: sync.request_id,
        };
        let offset = core
            .apply_replicated(&sync.topic, &entry)
            .await
            .map_err(|err| TransportError::Transient(err.to_string()))?;
        socket
            .send_value(&SyncAck {
                topic: sync.topic,
                offset,
            })
            .await?;
    }
}

async fn local_tails(core: &Arc<BrokerCore>) -> Result<HashMap<String, i64>, quay_core::BrokerError> {
    core.log_sizes().await
}
