//! Shared test harness utilities for the broker, registry, and transport
//! crates: a scratch log directory and proptest strategies for
//! producer/message sequences.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod strategies;
pub mod tempdir;

pub use tempdir::TempLogDir;

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Install a `tracing-subscriber` `fmt` layer once per test process.
///
/// Tests can call this unconditionally; only the first call takes effect.
pub fn init_test_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
