//! Axum scaffolding shared by the broker and registry binaries:
//! correlation-id middleware, a liveness handler, and a generic
//! JSON-over-WebSocket upgrade helper that each binary's protocol handlers
//! build on.
//!
//! This crate stays domain-agnostic. `quay-broker` and `quay-registry`
//! define their own routes and state; they depend on this crate only for
//! the plumbing below.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod handlers;
pub mod middleware;

pub use middleware::{correlation_id_layer, CorrelationIdExt, CORRELATION_ID_HEADER};
