//! Error taxonomy for broker- and registry-side operations.
//!
//! Split the way the transport/log errors are split in the source protocol:
//! storage and replication failures (`BrokerError`) versus coordination
//! failures (`RegistryError`). Both are plain `thiserror` enums; converting
//! these into a wire-level `Ack` or an HTTP response is the job of the
//! crate that owns the connection, not this one.

use thiserror::Error;

/// Errors a broker can encounter servicing a publish, subscribe, or follow.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Underlying file I/O failed.
    #[error("log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A log record failed its CRC check.
    #[error("corrupt log entry for topic {topic} at offset {offset}")]
    Corrupt {
        /// Topic the corrupt entry belongs to.
        topic: String,
        /// Byte offset the corrupt entry starts at.
        offset: i64,
    },

    /// The reader reached the end of the log with no more entries.
    #[error("end of log")]
    EndOfLog,

    /// A non-leader broker received a publish or follow request.
    #[error("this broker is not the leader")]
    NotLeader,

    /// This broker's registry link is unhealthy (circuit breaker open);
    /// publishes are refused until it recovers.
    #[error("registry link unavailable, refusing publish")]
    RegistryLinkDown,

    /// A follower or consumer connection failed mid-session.
    #[error("transport error: {0}")]
    Transport(String),

    /// Catch-all for conditions that don't warrant their own variant.
    #[error("{0}")]
    Other(String),
}

/// Errors the registry can encounter servicing broker or client requests.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No leader has registered yet.
    #[error("no leader registered")]
    NoLeader,

    /// A second broker tried to claim leadership while one is already held.
    #[error("leader slot already occupied")]
    SlotOccupied,

    /// A connection to a broker failed while broadcasting a swap.
    #[error("transport error: {0}")]
    Transport(String),

    /// Catch-all for conditions that don't warrant their own variant.
    #[error("{0}")]
    Other(String),
}
