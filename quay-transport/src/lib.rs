//! A JSON-over-WebSocket client transport with retries and redirect
//! following, implementing the abstract "socket" contract: dial, send one
//! typed request, await one `Ack`, follow `Redirect` without spending a
//! retry, back off randomly on transient failure, and allow an in-flight
//! `receive` to be cancelled by a concurrent `reset`/`close`.
//!
//! The server side of this protocol (accepting the WebSocket upgrade,
//! spawning the send/receive task pair) lives in `quay-web`, whose axum
//! handlers speak the same framing.

mod error;
mod socket;

pub use error::TransportError;
pub use socket::Socket;
