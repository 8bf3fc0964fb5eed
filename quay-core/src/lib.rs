//! Domain types and wire protocol shared by every `quay` component.
//!
//! This crate has no knowledge of sockets, files, or axum — it is the
//! "functional core" that the storage, transport, broker, and registry
//! crates build on top of. Everything here is plain data plus the pure
//! helpers (checksums, request-id derivation, status-code mapping) that
//! every other crate needs to agree on.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod message;
pub mod wire;

pub use error::{BrokerError, RegistryError};
pub use message::{request_id_for, LogEntry, Message};
pub use wire::{
    Ack, FollowAck, FollowRequest, InsyncChange, InsyncChangeKind, ProduceRequest, Status, Sync,
    SubscribeRequest, SyncAck,
};

/// Maximum randomized backoff between transport retry attempts, in milliseconds.
pub const MAX_RETRY_INTERVAL_MS: u64 = 2000;

/// Interval at which the registry re-broadcasts the in-sync set while leaderless.
pub const LEADER_WAIT_MS: u64 = 5000;

/// Default broker listen port.
pub const DEFAULT_BROKER_PORT: u16 = 5050;

/// Default registry listen port.
pub const DEFAULT_REGISTRY_PORT: u16 = 12345;
