//! A single consumer's stream over one topic, from a starting offset.

use std::sync::Arc;

use quay_core::BrokerError;
use quay_storage::Log;
use quay_web::handlers::JsonSink;
use quay_core::Message;

use crate::core::BrokerCore;

/// Streams entries from one topic's log to one consumer connection,
/// blocking at end-of-log until a publish wakes it.
pub struct Subscription {
    core: Arc<BrokerCore>,
    topic: String,
    log: Log,
}

impl Subscription {
    /// Open a private read cursor on `topic` at `offset` for this consumer.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Io`] if the log cannot be opened.
    pub fn new(core: Arc<BrokerCore>, topic: &str, offset: i64) -> Result<Self, BrokerError> {
        let log = Log::open(core.log_dir(), topic, offset)?;
        Ok(Self {
            core,
            topic: topic.to_string(),
            log,
        })
    }

    /// Stream entries to `sink` until the connection errors, the log is
    /// corrupt, or `quit` fires.
    pub async fn serve(mut self, sink: &mut JsonSink, quit: Arc<tokio::sync::Notify>) {
        loop {
            tokio::select! {
                biased;
                () = quit.notified() => return,
                outcome = self.next_entry() => {
                    match outcome {
                        Ok(message) => {
                            if sink.send_json(&message).await.is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(topic = %self.topic, error = %err, "subscription terminated");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Read the next message, blocking on the broker's publish notification
    /// when at end-of-log. Re-checks `stat_size` against the last-seen
    /// offset on every wakeup rather than trusting a single notification,
    /// since `notify_waiters` wakes every subscription regardless of topic.
    ///
    /// The wait future is created *before* each `stat_size` check, per
    /// [`BrokerCore::notified`]'s contract, so a publish landing between the
    /// check and the wait can never be missed.
    async fn next_entry(&mut self) -> Result<Message, BrokerError> {
        loop {
            match self.log.read_next(&self.topic) {
                Ok(entry) => return Ok(entry.message),
                Err(BrokerError::EndOfLog) => {
                    let last_seen = self.log.stat_size()?;
                    loop {
                        let notified = self.core.notified();
                        if self.log.stat_size()? > last_seen {
                            break;
                        }
                        notified.await;
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}
