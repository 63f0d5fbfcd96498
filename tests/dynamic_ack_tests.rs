//! End-to-end scenario for DynamicAcknowledgement: RTT
//! sample disambiguation via the iteration-tagged resend/acknowledge pair.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use pipeframe::frame::DynamicAckFrame;
use pipeframe::hash::hash_payload;
use pipeframe::pipeline::Pipeline;
use pipeframe::{DynamicAckConfig, DynamicAcknowledgement};
use tokio::time::Duration;

#[tokio::test(start_paused = true)]
async fn rtt_sample_attributed_to_the_resend_not_the_original_send() {
    let sender = Pipeline::new(vec![DynamicAcknowledgement::new(DynamicAckConfig::default())]);
    let sender_wire = Arc::new(Mutex::new(Vec::new()));
    let sw = Arc::clone(&sender_wire);
    sender.on_build_complete(move |f| sw.lock().push(f));

    sender.build(Bytes::from_static(&[0x41, 0x42]));
    let _dropped_data_frame = sender_wire.lock().remove(0);

    tokio::time::advance(Duration::from_millis(1000)).await;
    tokio::task::yield_now().await;

    let resend = sender_wire.lock().remove(0);
    let (iteration, payload) = match DynamicAckFrame::decode(&resend) {
        Some(DynamicAckFrame::Resend { iteration, payload }) => (iteration, payload),
        other => panic!("expected a Resend frame, got {other:?}"),
    };
    assert_eq!(iteration, 1);

    // A little more time passes before the ack for the retransmission
    // arrives; the sender must measure RTT against when it resent, not t0.
    tokio::time::advance(Duration::from_millis(50)).await;
    let hash = hash_payload(&payload);
    let ack = DynamicAckFrame::Acknowledge { iteration, hash }.encode();
    sender.read(ack);

    // No further retransmission should occur once the pending entry is
    // cleared by the matching acknowledgement.
    sender_wire.lock().clear();
    tokio::time::advance(Duration::from_millis(1000)).await;
    tokio::task::yield_now().await;
    assert!(sender_wire.lock().is_empty());
}

#[tokio::test]
async fn receiver_echoes_the_iteration_it_was_sent() {
    let receiver = Pipeline::new(vec![DynamicAcknowledgement::new(
        DynamicAckConfig::default(),
    )]);
    let receiver_wire = Arc::new(Mutex::new(Vec::new()));
    let rw = Arc::clone(&receiver_wire);
    receiver.on_build_complete(move |f| rw.lock().push(f));

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let d = Arc::clone(&delivered);
    receiver.on_read_complete(move |m| d.lock().push(m));

    let payload = Bytes::from_static(&[0x41, 0x42]);
    receiver.read(
        DynamicAckFrame::Resend {
            iteration: 3,
            payload: payload.clone(),
        }
        .encode(),
    );

    assert_eq!(delivered.lock().as_slice(), &[payload.clone()]);
    let ack = receiver_wire.lock().remove(0);
    let hash = hash_payload(&payload);
    assert_eq!(
        DynamicAckFrame::decode(&ack),
        Some(DynamicAckFrame::Acknowledge { iteration: 3, hash })
    );
}
