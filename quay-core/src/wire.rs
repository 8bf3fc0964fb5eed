//! JSON wire types exchanged between producers, consumers, brokers, and the
//! registry. See the protocol table for field-level documentation; this
//! module is the Rust encoding of that table, nothing more.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Status codes carried by every `Ack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum Status {
    /// The request succeeded; `Ack.payload` carries the response body.
    Success = 200,
    /// The request should be retried against `Ack.payload` (a hostport),
    /// without consuming a retry attempt.
    Redirect = 320,
    /// No leader is currently known; retry later.
    NotReady = 350,
    /// The request is invalid or was rejected; the caller should not retry
    /// against the same connection.
    Failure = 400,
}

/// The envelope returned in response to every request on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    /// Outcome of the request.
    pub status: Status,
    /// Status-dependent payload: response body, redirect hostport, or empty.
    #[serde(with = "serde_bytes_json")]
    pub payload: Vec<u8>,
}

impl Ack {
    /// Build a `Success` ack carrying an already-serialized payload.
    #[must_use]
    pub const fn success(payload: Vec<u8>) -> Self {
        Self {
            status: Status::Success,
            payload,
        }
    }

    /// Build a `Success` ack by JSON-serializing `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized to JSON.
    pub fn success_json<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        Ok(Self::success(serde_json::to_vec(value)?))
    }

    /// Build a `Redirect` ack pointing at `hostport`.
    #[must_use]
    pub fn redirect(hostport: &str) -> Self {
        Self {
            status: Status::Redirect,
            payload: hostport.as_bytes().to_vec(),
        }
    }

    /// Build a `NotReady` ack with no payload.
    #[must_use]
    pub const fn not_ready() -> Self {
        Self {
            status: Status::NotReady,
            payload: Vec::new(),
        }
    }

    /// Build a `Failure` ack with no payload.
    #[must_use]
    pub const fn failure() -> Self {
        Self {
            status: Status::Failure,
            payload: Vec::new(),
        }
    }

    /// Deserialize `payload` as JSON into `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if `payload` is not valid JSON for `T`.
    pub fn payload_json<T: for<'de> Deserialize<'de>>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }
}

/// `payload: bytes` is serialized as a JSON array of numbers by plain serde
/// derive; this helper keeps it that way explicitly rather than relying on
/// the default `Vec<u8>` impl, so the wire format stays stable if the field
/// type changes shape later.
mod serde_bytes_json {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        bytes.to_vec().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Vec::<u8>::deserialize(deserializer)
    }
}

/// A producer's publish request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProduceRequest {
    /// Producer id, used to scope request-id de-duplication.
    pub id: String,
    /// Destination topic.
    pub topic: String,
    /// The message to append.
    pub message: Message,
}

/// A consumer's subscribe request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Topic to stream.
    pub topic: String,
    /// Starting byte offset (0 for "from the beginning").
    pub offset: i64,
}

/// A follower's request to join a leader's replication stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowRequest {
    /// Per-topic tails the follower already has on disk.
    pub offsets: HashMap<String, i64>,
    /// The follower's own dialable hostport.
    pub hostport: String,
}

/// Delivered inside a `Success` `Ack.payload` in response to a `FollowRequest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowAck {
    /// Per-topic byte offsets the follower must truncate its log to before
    /// accepting any `Sync` messages.
    pub truncate: HashMap<String, i64>,
}

/// One replicated log entry, pushed from leader to follower.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sync {
    /// Topic the entry belongs to.
    pub topic: String,
    /// The message being replicated.
    pub message: Message,
    /// The entry's request id (carried so followers dedup identically).
    pub request_id: [u8; 32],
}

/// A follower's acknowledgement of one `Sync` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncAck {
    /// Topic the ack refers to.
    pub topic: String,
    /// The follower's new on-disk size for that topic after the write.
    pub offset: i64,
}

/// Whether a hostport is joining or leaving the in-sync set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum InsyncChangeKind {
    /// The hostport just caught up and joined the in-sync set.
    Add = 0,
    /// The hostport was evicted or disconnected.
    Remove = 1,
}

/// A leader's notification to the registry that its in-sync set changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsyncChange {
    /// Add or remove.
    pub kind: InsyncChangeKind,
    /// The affected follower's hostport.
    pub hostport: String,
}
