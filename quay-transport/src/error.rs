//! Errors surfaced by [`crate::Socket`].

use thiserror::Error;

/// Errors the client transport can surface.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The connection attempt or an in-flight read/write failed transiently;
    /// the caller may retry after backing off.
    #[error("transient transport error: {0}")]
    Transient(String),

    /// The remote replied with a `Failure` ack: the socket was closed and
    /// the caller should not retry on the same connection.
    #[error("remote closed the connection with Failure")]
    Failure,

    /// `send` exhausted its configured attempt budget.
    #[error("exceeded retries")]
    ExceededRetries,

    /// A concurrent `reset` or `close` interrupted a blocked `receive`.
    #[error("socket was reset or closed while receiving")]
    Cancelled,

    /// The socket is closed; no further operations are possible.
    #[error("socket is closed")]
    Closed,

    /// A message failed to (de)serialize as JSON.
    #[error("(de)serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
