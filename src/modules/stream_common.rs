//! Receiver-side ordering and buffering shared by the `Stream` and
//! `DynamicStream` modules: both use the same wire format and the same
//! in-order-delivery-with-reorder-buffer algorithm, differing only in how
//! the sender paces retransmission.

use std::collections::BTreeMap;

use bytes::Bytes;
use tracing::debug;

/// What a single inbound `Message` produced: zero or more payloads now
/// deliverable in order, an optional cumulative acknowledgement to emit,
/// and an optional resend request listing still-missing indices.
pub struct ReceiveOutcome {
    pub delivered: Vec<Bytes>,
    pub ack: Option<u32>,
    pub resend: Option<Vec<u32>>,
}

/// Receiver-side sequence state: the in-order watermark and the buffer of
/// messages that arrived ahead of it.
pub struct ReceiveState {
    receive_index: u32,
    buffer: BTreeMap<u32, Bytes>,
}

impl ReceiveState {
    pub fn new() -> Self {
        Self {
            receive_index: 0,
            buffer: BTreeMap::new(),
        }
    }

    /// Fold in one `Message(index, payload)` per the module's receiver
    /// algorithm. `window` is the configured receive buffer size.
    pub fn on_message(&mut self, index: u32, payload: Bytes, window: u32) -> ReceiveOutcome {
        if index < self.receive_index {
            // Sender is behind our cumulative ack; re-state it and stop.
            return ReceiveOutcome {
                delivered: Vec::new(),
                ack: Some(self.receive_index - 1),
                resend: None,
            };
        }

        if index - self.receive_index > window {
            debug!(
                index,
                receive_index = self.receive_index,
                window,
                "message outside receive window, dropping"
            );
            return ReceiveOutcome {
                delivered: Vec::new(),
                ack: None,
                resend: None,
            };
        }

        if index == self.receive_index {
            let mut delivered = vec![payload];
            let mut last_delivered = index;
            while let Some(next) = self.buffer.remove(&(last_delivered + 1)) {
                delivered.push(next);
                last_delivered += 1;
            }
            self.receive_index = last_delivered + 1;
            return ReceiveOutcome {
                delivered,
                // "Last index delivered upward", not `receive_index` itself --
                // see the off-by-one note this preserves from the source.
                ack: Some(last_delivered),
                resend: None,
            };
        }

        // Gap: buffer it and report everything still missing below it.
        self.buffer.insert(index, payload);
        let missing: Vec<u32> = (self.receive_index..=index)
            .filter(|i| !self.buffer.contains_key(i))
            .collect();
        ReceiveOutcome {
            delivered: Vec::new(),
            ack: None,
            resend: Some(missing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_burst_delivers_immediately() {
        let mut state = ReceiveState::new();
        let o0 = state.on_message(0, Bytes::from_static(b"A"), 50);
        assert_eq!(o0.delivered, vec![Bytes::from_static(b"A")]);
        assert_eq!(o0.ack, Some(0));

        let o1 = state.on_message(1, Bytes::from_static(b"B"), 50);
        assert_eq!(o1.delivered, vec![Bytes::from_static(b"B")]);
        assert_eq!(o1.ack, Some(1));
    }

    #[test]
    fn reorder_buffers_then_drains() {
        let mut state = ReceiveState::new();
        let o0 = state.on_message(0, Bytes::from_static(b"A"), 50);
        assert_eq!(o0.ack, Some(0));

        let o2 = state.on_message(2, Bytes::from_static(b"C"), 50);
        assert!(o2.delivered.is_empty());
        assert_eq!(o2.resend, Some(vec![1]));

        let o1 = state.on_message(1, Bytes::from_static(b"B"), 50);
        assert_eq!(
            o1.delivered,
            vec![Bytes::from_static(b"B"), Bytes::from_static(b"C")]
        );
        assert_eq!(o1.ack, Some(2));
    }

    #[test]
    fn gap_outside_window_is_dropped() {
        let mut state = ReceiveState::new();
        let outcome = state.on_message(3, Bytes::from_static(b"D"), 2);
        assert!(outcome.delivered.is_empty());
        assert_eq!(outcome.ack, None);
        assert_eq!(outcome.resend, None);
    }

    #[test]
    fn duplicate_message_delivers_at_most_once() {
        let mut state = ReceiveState::new();
        let first = state.on_message(0, Bytes::from_static(b"A"), 50);
        assert_eq!(first.delivered.len(), 1);

        let second = state.on_message(0, Bytes::from_static(b"A"), 50);
        assert!(second.delivered.is_empty());
        assert_eq!(second.ack, Some(0));
    }
}
