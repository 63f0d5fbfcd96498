//! Sequence-numbered sliding-window reliable ordered stream, fixed timeout.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::time::{sleep, Duration, Instant};

use super::stream_common::ReceiveState;
use crate::frame::StreamFrame;
use crate::pipeline::{Module, ModuleHandle};

/// Tuning knobs for [`Stream`].
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    pub timeout: Duration,
    pub receive_buffer_size: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(50),
            receive_buffer_size: 50,
        }
    }
}

impl StreamConfig {
    pub fn new(timeout: Duration, receive_buffer_size: u32) -> crate::error::Result<Self> {
        if timeout.is_zero() {
            return Err(crate::error::PipelineError::InvalidTimeout(
                "timeout must be greater than zero".into(),
            ));
        }
        if receive_buffer_size == 0 {
            return Err(crate::error::PipelineError::InvalidWindow(
                "receive_buffer_size must be greater than zero".into(),
            ));
        }
        Ok(Self {
            timeout,
            receive_buffer_size,
        })
    }
}

struct UnackedPacket {
    framed: Bytes,
}

struct SenderState {
    send_index: u32,
    ack_index: u32,
    unacknowledged: BTreeMap<u32, UnackedPacket>,
    last_sent_time: Option<Instant>,
}

impl SenderState {
    fn new() -> Self {
        Self {
            send_index: 0,
            ack_index: 0,
            unacknowledged: BTreeMap::new(),
            last_sent_time: None,
        }
    }
}

/// Sender retransmits only the most recently sent packet on a fixed timer;
/// earlier gaps are covered entirely by the receiver-driven `Resend` path.
pub struct Stream {
    config: StreamConfig,
    sender: Mutex<SenderState>,
    receiver: Mutex<ReceiveState>,
    handle: RwLock<Option<ModuleHandle>>,
    timer_started: AtomicBool,
}

impl Stream {
    pub fn new(config: StreamConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            sender: Mutex::new(SenderState::new()),
            receiver: Mutex::new(ReceiveState::new()),
            handle: RwLock::new(None),
            timer_started: AtomicBool::new(false),
        })
    }

    async fn run_timer(self: Arc<Self>) {
        loop {
            sleep(Duration::from_millis(1)).await;
            let now = Instant::now();
            let due = {
                let mut state = self.sender.lock();
                let fire = state.last_sent_time.is_some_and(|last| {
                    now.saturating_duration_since(last) >= self.config.timeout
                });
                if !fire || state.send_index == 0 {
                    None
                } else {
                    let idx = state.send_index - 1;
                    let frame = state.unacknowledged.get(&idx).map(|p| p.framed.clone());
                    if frame.is_some() {
                        state.last_sent_time = Some(now);
                    }
                    frame
                }
            };
            if let Some(frame) = due {
                if let Some(handle) = self.handle.read().clone() {
                    handle.continue_build(frame);
                }
            }
        }
    }
}

impl Module for Stream {
    fn bind(self: Arc<Self>, handle: ModuleHandle) {
        *self.handle.write() = Some(handle);
        if !self.timer_started.swap(true, Ordering::SeqCst) {
            let this = Arc::clone(&self);
            tokio::spawn(this.run_timer());
        }
    }

    fn read(&self, data: Bytes) {
        let Some(frame) = StreamFrame::decode(&data) else {
            return;
        };
        match frame {
            StreamFrame::Message { index, payload } => {
                let outcome = self
                    .receiver
                    .lock()
                    .on_message(index, payload, self.config.receive_buffer_size);
                let Some(handle) = self.handle.read().clone() else {
                    return;
                };
                for delivered in outcome.delivered {
                    handle.continue_read(delivered);
                }
                if let Some(ack) = outcome.ack {
                    handle.continue_build(StreamFrame::Acknowledgement { index: ack }.encode());
                }
                if let Some(missing) = outcome.resend {
                    handle.continue_build(StreamFrame::Resend { indices: missing }.encode());
                }
            }
            StreamFrame::Acknowledgement { index } => {
                let mut state = self.sender.lock();
                if index >= state.ack_index {
                    for i in state.ack_index..=index {
                        state.unacknowledged.remove(&i);
                    }
                    state.ack_index = index + 1;
                } else {
                    tracing::debug!(index, ack_index = state.ack_index, "stale acknowledgement, ignoring");
                }
            }
            StreamFrame::Resend { indices } => {
                let frames: Vec<Bytes> = {
                    let state = self.sender.lock();
                    indices
                        .into_iter()
                        .filter(|i| *i >= state.ack_index)
                        .filter_map(|i| state.unacknowledged.get(&i).map(|p| p.framed.clone()))
                        .collect()
                };
                if let Some(handle) = self.handle.read().clone() {
                    for frame in frames {
                        handle.continue_build(frame);
                    }
                }
            }
        }
    }

    fn build(&self, data: Bytes) {
        let framed;
        {
            let mut state = self.sender.lock();
            let index = state.send_index;
            framed = StreamFrame::Message {
                index,
                payload: data,
            }
            .encode();
            state
                .unacknowledged
                .insert(index, UnackedPacket { framed: framed.clone() });
            state.last_sent_time = Some(Instant::now());
            state.send_index += 1;
        }
        if let Some(handle) = self.handle.read().clone() {
            handle.continue_build(framed);
        }
    }
}
