//! Generic JSON-over-WebSocket upgrade helper.
//!
//! The broker and registry protocols are each a small sequence of typed
//! JSON messages over one connection — a single request/ack for `/publish`,
//! a multi-step handshake for `/follow`, a push stream for `/subscribe`.
//! Rather than hand-roll the upgrade and framing per endpoint, this module
//! generalizes the split-sender/receiver-task shape into `send_json`/
//! `recv_json` primitives that a per-endpoint handler drives however its
//! protocol needs.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Upgrade an HTTP connection to a WebSocket and hand the raw socket to
/// `handler`. The handler owns the full connection lifecycle: it decides
/// when to read, when to write, and when to return (which closes the
/// socket).
pub fn upgrade_json<F, Fut>(ws: WebSocketUpgrade, handler: F) -> Response
where
    F: FnOnce(JsonSocket) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    ws.on_upgrade(move |socket| async move { handler(JsonSocket(socket)).await })
}

/// A WebSocket carrying newline-agnostic JSON text frames.
pub struct JsonSocket(WebSocket);

impl JsonSocket {
    /// Serialize and send one JSON message.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the underlying send fails.
    pub async fn send_json<T: Serialize>(&mut self, value: &T) -> Result<(), SocketError> {
        let text = serde_json::to_string(value)?;
        self.0.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Receive and deserialize the next JSON message.
    ///
    /// Returns `None` once the client has closed the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if a non-text frame arrives, deserialization fails,
    /// or the underlying receive fails.
    pub async fn recv_json<T: DeserializeOwned>(&mut self) -> Option<Result<T, SocketError>> {
        loop {
            match self.0.next().await? {
                Ok(Message::Text(text)) => return Some(serde_json::from_str(&text).map_err(SocketError::from)),
                Ok(Message::Close(_)) => return None,
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_)) => continue,
                Err(err) => return Some(Err(SocketError::from(err))),
            }
        }
    }

    /// Split into independent send/receive halves for handlers that need a
    /// concurrent push task alongside a disconnect-watching task (the
    /// `/subscribe` endpoint's shape).
    #[must_use]
    pub fn split(self) -> (JsonSink, JsonStream) {
        let (sink, stream) = self.0.split();
        (JsonSink(sink), JsonStream(stream))
    }
}

/// The send half of a split [`JsonSocket`].
pub struct JsonSink(SplitSink<WebSocket, Message>);

impl JsonSink {
    /// Serialize and send one JSON message.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the underlying send fails.
    pub async fn send_json<T: Serialize>(&mut self, value: &T) -> Result<(), SocketError> {
        let text = serde_json::to_string(value)?;
        self.0.send(Message::Text(text)).await?;
        Ok(())
    }
}

/// The receive half of a split [`JsonSocket`].
pub struct JsonStream(SplitStream<WebSocket>);

impl JsonStream {
    /// Receive and deserialize the next JSON message.
    pub async fn recv_json<T: DeserializeOwned>(&mut self) -> Option<Result<T, SocketError>> {
        loop {
            match self.0.next().await? {
                Ok(Message::Text(text)) => return Some(serde_json::from_str(&text).map_err(SocketError::from)),
                Ok(Message::Close(_)) => return None,
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_)) => continue,
                Err(err) => return Some(Err(SocketError::from(err))),
            }
        }
    }
}

/// Errors from a `JsonSocket` read or write.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    /// The underlying WebSocket connection failed.
    #[error("websocket error: {0}")]
    Connection(#[from] axum::Error),
    /// A frame did not deserialize as the expected JSON type.
    #[error("malformed json frame: {0}")]
    Serde(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        n: u32,
    }

    #[test]
    fn socket_error_wraps_serde_errors() {
        let bad: serde_json::Result<Ping> = serde_json::from_str("not json");
        let err = SocketError::from(bad.unwrap_err());
        assert!(matches!(err, SocketError::Serde(_)));
    }
}
