//! End-to-end scenarios for the DynamicStream module: same receiver-side
//! ordering as Stream, plus adaptive sender-side retransmission timing.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use pipeframe::frame::StreamFrame;
use pipeframe::pipeline::Pipeline;
use pipeframe::{DynamicStream, DynamicStreamConfig};
use tokio::time::Duration;

#[test]
fn receiver_side_ordering_matches_the_fixed_timeout_variant() {
    let sender = Pipeline::new(vec![DynamicStream::new(DynamicStreamConfig::default())]);
    let receiver = Pipeline::new(vec![DynamicStream::new(DynamicStreamConfig::default())]);

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let d = Arc::clone(&delivered);
    receiver.on_read_complete(move |m| d.lock().push(m));

    let sender_wire = Arc::new(Mutex::new(Vec::new()));
    let sw = Arc::clone(&sender_wire);
    sender.on_build_complete(move |f| sw.lock().push(f));

    for byte in [b'A', b'B', b'C'] {
        sender.build(Bytes::copy_from_slice(&[byte]));
    }
    let frames: Vec<Bytes> = sender_wire.lock().drain(..).collect();

    // Deliver out of order: 0, 2, 1.
    receiver.read(frames[0].clone());
    receiver.read(frames[2].clone());
    receiver.read(frames[1].clone());

    assert_eq!(
        delivered.lock().as_slice(),
        &[
            Bytes::from_static(b"A"),
            Bytes::from_static(b"B"),
            Bytes::from_static(b"C"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn first_retransmission_uses_max_timeout_before_any_rtt_sample() {
    let sender = Pipeline::new(vec![DynamicStream::new(DynamicStreamConfig::default())]);
    let sender_wire = Arc::new(Mutex::new(Vec::new()));
    let sw = Arc::clone(&sender_wire);
    sender.on_build_complete(move |f| sw.lock().push(f));

    sender.build(Bytes::from_static(b"A"));
    let first = sender_wire.lock().remove(0);

    // Below max_timeout (500ms default): no retransmission yet.
    tokio::time::advance(Duration::from_millis(100)).await;
    tokio::task::yield_now().await;
    assert!(sender_wire.lock().is_empty());

    tokio::time::advance(Duration::from_millis(450)).await;
    tokio::task::yield_now().await;
    let retransmitted = sender_wire.lock().remove(0);
    assert_eq!(retransmitted, first);
}

#[tokio::test]
async fn cumulative_ack_over_a_batch_learns_the_minimum_sample() {
    let sender = Pipeline::new(vec![DynamicStream::new(DynamicStreamConfig::default())]);
    let sender_wire = Arc::new(Mutex::new(Vec::new()));
    let sw = Arc::clone(&sender_wire);
    sender.on_build_complete(move |f| sw.lock().push(f));

    sender.build(Bytes::from_static(b"A"));
    sender.build(Bytes::from_static(b"B"));

    // Acknowledge both at once; this must not panic and must clear both
    // unacknowledged entries regardless of which sample is smaller.
    sender.read(StreamFrame::Acknowledgement { index: 1 }.encode());

    // A subsequent resend request for either index should find nothing
    // pending, since the cumulative ack cleared both.
    sender_wire.lock().clear();
    sender.read(StreamFrame::Resend { indices: vec![0, 1] }.encode());
    assert!(sender_wire.lock().is_empty());
}
