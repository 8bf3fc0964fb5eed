//! HTTP and WebSocket request handlers.

pub mod health;
pub mod websocket;

pub use health::health_check;
pub use websocket::{upgrade_json, JsonSink, JsonSocket, JsonStream, SocketError};
