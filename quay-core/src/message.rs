//! The producer-authored `Message` and the on-disk `LogEntry` that wraps it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A producer-authored record.
///
/// `id` starts life as the producer's own sequence number. Once a broker
/// reads this message back out of its log, it overwrites `id` with the
/// byte offset the entry begins at ("offset-as-id") before handing it to
/// a consumer or follower.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Producer sequence number, later replaced by the log offset.
    pub id: i64,
    /// Raw message payload.
    pub payload: Vec<u8>,
    /// CRC32 of `payload`, computed by the producer and re-verified on read.
    pub checksum: u32,
}

impl Message {
    /// Build a message from a payload, computing its checksum.
    #[must_use]
    pub fn new(id: i64, payload: Vec<u8>) -> Self {
        let checksum = crc32fast::hash(&payload);
        Self {
            id,
            payload,
            checksum,
        }
    }

    /// Whether `checksum` matches the stored payload.
    #[must_use]
    pub fn checksum_valid(&self) -> bool {
        crc32fast::hash(&self.payload) == self.checksum
    }
}

/// The on-disk unit: a `Message` plus the request id used for de-duplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The wrapped message.
    pub message: Message,
    /// SHA-256 of `"{producer_id}:{message.id}"`, used to collapse retried
    /// re-sends of the same produce request into a single log write.
    pub request_id: [u8; 32],
}

impl LogEntry {
    /// Build a fresh entry for `producer_id`, deriving its request id.
    #[must_use]
    pub fn new(producer_id: &str, message: Message) -> Self {
        let request_id = request_id_for(producer_id, message.id);
        Self {
            message,
            request_id,
        }
    }
}

/// Derive the 32-byte request id for a `(producer_id, sequence)` pair.
///
/// This is `SHA256("producer_id:sequence")`, scoped only to the most
/// recently written entry for de-duplication purposes — not a log-wide
/// dedup index.
#[must_use]
pub fn request_id_for(producer_id: &str, sequence: i64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(producer_id.as_bytes());
    hasher.update(b":");
    hasher.update(sequence.to_string().as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_round_trips() {
        let msg = Message::new(1, b"hello".to_vec());
        assert!(msg.checksum_valid());
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let mut msg = Message::new(1, b"hello".to_vec());
        msg.payload[0] = b'H';
        assert!(!msg.checksum_valid());
    }

    #[test]
    fn request_id_is_deterministic() {
        let a = request_id_for("x", 1);
        let b = request_id_for("x", 1);
        assert_eq!(a, b);
    }

    #[test]
    fn request_id_differs_by_sequence() {
        let a = request_id_for("x", 1);
        let b = request_id_for("x", 2);
        assert_ne!(a, b);
    }

    #[test]
    fn request_id_differs_by_producer() {
        let a = request_id_for("x", 1);
        let b = request_id_for("y", 1);
        assert_ne!(a, b);
    }
}
