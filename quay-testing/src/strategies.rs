//! Proptest strategies for generating producer/message sequences.

use proptest::prelude::*;
use quay_core::Message;

/// A plausible producer id: short, printable, non-empty.
pub fn producer_id() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,15}".prop_map(String::from)
}

/// A message payload of bounded size.
pub fn payload() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..256)
}

/// A single producer's monotonically sequenced messages, as `(producer_id,
/// Vec<Message>)`, where each message's `id` is its position in the
/// sequence (the producer's own sequence number before the broker
/// overwrites it with an offset).
pub fn producer_message_sequence(max_len: usize) -> impl Strategy<Value = (String, Vec<Message>)> {
    (producer_id(), proptest::collection::vec(payload(), 1..=max_len)).prop_map(|(producer, payloads)| {
        let messages = payloads
            .into_iter()
            .enumerate()
            .map(|(i, p)| Message::new(i64::try_from(i).unwrap_or(i64::MAX), p))
            .collect();
        (producer, messages)
    })
}

/// Several producers, each with their own sequence, interleaved in
/// generation order (not necessarily the order a test chooses to apply them).
pub fn multi_producer_sequences(
    producers: usize,
    max_len: usize,
) -> impl Strategy<Value = Vec<(String, Vec<Message>)>> {
    proptest::collection::vec(producer_message_sequence(max_len), 1..=producers)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn producer_sequences_have_increasing_ids((_, messages) in producer_message_sequence(8)) {
            for (i, message) in messages.iter().enumerate() {
                prop_assert_eq!(message.id, i as i64);
            }
        }
    }
}
