//! Client-side socket: one logical connection to a broker or registry,
//! carrying typed JSON messages over a WebSocket.

use futures::{SinkExt, StreamExt};
use quay_core::{Ack, Status};
use quay_runtime::{retry_with_backoff, RetryPolicy};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct Inner {
    stream: Option<WsStream>,
    hostport: String,
    /// Bumped on every `reset`/`close`; a `receive` in flight checks this
    /// after reacquiring the lock and discards its result if it changed,
    /// which is how a concurrent reset/close cancels a blocked receive.
    generation: u64,
    closed: bool,
}

/// A retrying, redirect-following client connection to one endpoint path
/// (e.g. a broker's `/publish`, or the registry's `/leader`).
pub struct Socket {
    inner: Mutex<Inner>,
    path: &'static str,
}

impl Socket {
    /// Create a socket targeting `hostport` (`host:port`, no scheme) and
    /// the fixed endpoint `path` (e.g. `"/publish"`). The connection is
    /// dialed lazily on first use.
    #[must_use]
    pub fn new(hostport: impl Into<String>, path: &'static str) -> Self {
        Self {
            inner: Mutex::new(Inner {
                stream: None,
                hostport: hostport.into(),
                generation: 0,
                closed: false,
            }),
            path,
        }
    }

    /// Send `request`, retrying transient failures up to `max_attempts`
    /// times and following `Redirect` acks without consuming an attempt.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ExceededRetries`] once `max_attempts`
    /// transient failures have occurred, [`TransportError::Failure`] if the
    /// remote replies `Failure`, or [`TransportError::Closed`] if the
    /// socket has been permanently closed.
    pub async fn send<T: Serialize>(
        &self,
        request: &T,
        max_attempts: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let body = serde_json::to_vec(request)?;
        let policy = RetryPolicy::builder().max_attempts(max_attempts).build();

        // Redirects are followed inside the retried operation itself so they
        // never consume an attempt; only a transient error reaches
        // `retry_with_backoff`, which owns the attempt count and backoff.
        let outcome = retry_with_backoff(policy, || async {
            loop {
                match self.try_send_once(&body).await {
                    Ok(SendOutcome::Redirected) => continue,
                    other => return other,
                }
            }
        })
        .await;

        match outcome {
            Ok(SendOutcome::Success(payload)) => Ok(payload),
            Ok(SendOutcome::Failure) => Err(TransportError::Failure),
            Ok(SendOutcome::Redirected) => {
                unreachable!("redirects are resolved before the operation returns")
            }
            Err(_) => Err(TransportError::ExceededRetries),
        }
    }

    async fn try_send_once(&self, body: &[u8]) -> Result<SendOutcome, TransportError> {
        self.ensure_connected().await?;
        self.write_raw(WsMessage::Text(
            String::from_utf8_lossy(body).into_owned(),
        ))
        .await?;
        let ack: Ack = self.receive().await?;
        match ack.status {
            Status::Success => Ok(SendOutcome::Success(ack.payload)),
            Status::Redirect => {
                let hostport = String::from_utf8_lossy(&ack.payload).into_owned();
                self.reset(hostport).await;
                Ok(SendOutcome::Redirected)
            }
            Status::Failure => {
                self.close().await;
                Ok(SendOutcome::Failure)
            }
            Status::NotReady => Err(TransportError::Transient("not ready".to_string())),
        }
    }

    /// Read the next typed message on the current connection.
    ///
    /// Drops the internal lock while awaiting the underlying I/O so a
    /// concurrent `reset`/`close` can interrupt this call.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Cancelled`] if `reset`/`close` interrupted
    /// the read, [`TransportError::Closed`] if the socket was already
    /// closed, or [`TransportError::Transient`] on an I/O failure.
    pub async fn receive<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        let (mut stream, generation) = {
            let mut guard = self.inner.lock().await;
            if guard.closed {
                return Err(TransportError::Closed);
            }
            let stream = guard.stream.take().ok_or_else(|| {
                TransportError::Transient("not connected".to_string())
            })?;
            (stream, guard.generation)
        };

        let next = stream.next().await;

        let mut guard = self.inner.lock().await;
        if guard.generation != generation {
            // A reset/close raced us; the connection we were reading from
            // is no longer the current one.
            return Err(TransportError::Cancelled);
        }
        guard.stream = Some(stream);
        drop(guard);

        match next {
            Some(Ok(WsMessage::Text(text))) => {
                serde_json::from_str(&text).map_err(TransportError::from)
            }
            Some(Ok(WsMessage::Close(_))) | None => {
                Err(TransportError::Transient("connection closed".to_string()))
            }
            Some(Ok(_)) => Err(TransportError::Transient("unexpected frame type".to_string())),
            Some(Err(err)) => Err(TransportError::Transient(err.to_string())),
        }
    }

    /// Send one ack directly, with no retry loop.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if the socket is closed, or
    /// [`TransportError::Transient`] on an I/O failure.
    pub async fn acknowledge(&self, ack: &Ack) -> Result<(), TransportError> {
        self.send_value(ack).await
    }

    /// Send any serializable value directly on the current connection, with
    /// no retry loop. Used for duplex protocols (replication streaming,
    /// `SyncAck`s) that don't fit the request/ack `send` shape.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if the socket is closed, or
    /// [`TransportError::Transient`] on an I/O failure.
    pub async fn send_value<T: Serialize>(&self, value: &T) -> Result<(), TransportError> {
        let body = serde_json::to_string(value)?;
        self.write_raw(WsMessage::Text(body)).await
    }

    /// Close the current connection and redirect future sends at `hostport`.
    /// Interrupts any blocked `receive`.
    pub async fn reset(&self, hostport: impl Into<String>) {
        let mut guard = self.inner.lock().await;
        guard.stream = None;
        guard.hostport = hostport.into();
        guard.generation += 1;
    }

    /// Permanently close this socket. Interrupts any blocked `receive`; all
    /// subsequent operations fail with [`TransportError::Closed`].
    pub async fn close(&self) {
        let mut guard = self.inner.lock().await;
        guard.stream = None;
        guard.closed = true;
        guard.generation += 1;
    }

    async fn write_raw(&self, message: WsMessage) -> Result<(), TransportError> {
        self.ensure_connected().await?;
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(TransportError::Closed);
        }
        let stream = guard
            .stream
            .as_mut()
            .ok_or_else(|| TransportError::Transient("not connected".to_string()))?;
        stream
            .send(message)
            .await
            .map_err(|err| TransportError::Transient(err.to_string()))
    }

    async fn ensure_connected(&self) -> Result<(), TransportError> {
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(TransportError::Closed);
        }
        if guard.stream.is_some() {
            return Ok(());
        }
        let url = format!("ws://{}{}", guard.hostport, self.path);
        let (stream, _) = connect_async(&url)
            .await
            .map_err(|err| TransportError::Transient(err.to_string()))?;
        guard.stream = Some(stream);
        Ok(())
    }
}

enum SendOutcome {
    Success(Vec<u8>),
    Redirected,
    Failure,
}
