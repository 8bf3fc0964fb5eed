//! Per-topic append-only log storage.
//!
//! A topic's log lives at `<log_dir>/<topic>.ocp` as a sequence of
//! self-describing records: `[u32 LE length][u32 LE crc32][32-byte
//! request_id][payload]`, where `length = 4 + 32 + payload.len()`. See
//! [`Log`] for the operations built on top of this layout.

mod log;

pub use log::{topic_log_path, truncate, Log};
