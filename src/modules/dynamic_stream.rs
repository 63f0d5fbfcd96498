//! Sequence-numbered sliding-window reliable ordered stream with adaptive
//! timeout derived from acknowledgement latency.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::time::{sleep, Duration, Instant};

use super::stream_common::ReceiveState;
use crate::frame::StreamFrame;
use crate::pipeline::{Module, ModuleHandle};

/// Tuning knobs for [`DynamicStream`].
#[derive(Debug, Clone, Copy)]
pub struct DynamicStreamConfig {
    pub multiplier: f64,
    pub min_timeout: Duration,
    pub max_timeout: Duration,
    pub receive_buffer_size: u32,
}

impl Default for DynamicStreamConfig {
    fn default() -> Self {
        Self {
            multiplier: 2.0,
            min_timeout: Duration::from_millis(1),
            max_timeout: Duration::from_millis(500),
            receive_buffer_size: 50,
        }
    }
}

impl DynamicStreamConfig {
    pub fn new(
        min_timeout: Duration,
        max_timeout: Duration,
        multiplier: f64,
        receive_buffer_size: u32,
    ) -> crate::error::Result<Self> {
        if max_timeout < min_timeout {
            return Err(crate::error::PipelineError::InvalidTimeout(
                "max_timeout must be at least min_timeout".into(),
            ));
        }
        if multiplier <= 0.0 {
            return Err(crate::error::PipelineError::InvalidTimeout(
                "multiplier must be positive".into(),
            ));
        }
        if receive_buffer_size == 0 {
            return Err(crate::error::PipelineError::InvalidWindow(
                "receive_buffer_size must be greater than zero".into(),
            ));
        }
        Ok(Self {
            min_timeout,
            max_timeout,
            multiplier,
            receive_buffer_size,
        })
    }
}

struct UnackedPacket {
    framed: Bytes,
    /// Used for RTT sampling. Refreshed on a receiver-driven `Resend`, but
    /// left untouched by timer-driven retransmission of the tail packet --
    /// samples against a timer-retransmitted entry would overestimate, and
    /// that skew is preserved rather than corrected.
    send_time: Instant,
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

pub struct DynamicStream {
    config: DynamicStreamConfig,
    sender: Mutex<SenderState>,
    receiver: Mutex<ReceiveState>,
    /// Learned round-trip estimate, `None` until the first cumulative ack.
    timeout: RwLock<Option<Duration>>,
    handle: RwLock<Option<ModuleHandle>>,
    timer_started: AtomicBool,
}

impl DynamicStream {
    pub fn new(config: DynamicStreamConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            sender: Mutex::new(SenderState::new()),
            receiver: Mutex::new(ReceiveState::new()),
            timeout: RwLock::new(None),
            handle: RwLock::new(None),
            timer_started: AtomicBool::new(false),
        })
    }

    async fn run_timer(self: Arc<Self>) {
        loop {
            sleep(Duration::from_millis(1)).await;
            let now = Instant::now();
            let learned = *self.timeout.read();
            let due = {
                let mut state = self.sender.lock();
                let Some(last_sent) = state.last_sent_time else {
                    continue;
                };
                if state.send_index == 0 {
                    continue;
                }
                let elapsed = now.saturating_duration_since(last_sent);
                let adaptive_fire = learned.is_some_and(|t| {
                    let effective = t.mul_f64(self.config.multiplier);
                    effective >= self.config.min_timeout && elapsed >= effective
                });
                if elapsed < self.config.max_timeout && !adaptive_fire {
                    continue;
                }
                let idx = state.send_index - 1;
                let frame = state.unacknowledged.get(&idx).map(|p| p.framed.clone());
                if frame.is_some() {
                    state.last_sent_time = Some(now);
                }
                frame
            };
            if let Some(frame) = due {
                if let Some(handle) = self.handle.read().clone() {
                    handle.continue_build(frame);
                }
            }
        }
    }
}

impl Module for DynamicStream {
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
                let now = Instant::now();
                let mut state = self.sender.lock();
                if index < state.ack_index {
                    tracing::debug!(index, ack_index = state.ack_index, "stale acknowledgement, ignoring");
                    return;
                }
                let mut min_sample: Option<Duration> = None;
                for i in state.ack_index..=index {
                    if let Some(packet) = state.unacknowledged.remove(&i) {
                        let sample = now.saturating_duration_since(packet.send_time);
                        min_sample = Some(match min_sample {
                            Some(current) => current.min(sample),
                            None => sample,
                        });
                    }
                }
                state.ack_index = index + 1;
                drop(state);
                if let Some(sample) = min_sample {
                    *self.timeout.write() = Some(sample);
                }
            }
            StreamFrame::Resend { indices } => {
                let now = Instant::now();
                let frames: Vec<Bytes> = {
                    let mut state = self.sender.lock();
                    let mut frames = Vec::new();
                    for idx in indices {
                        if idx < state.ack_index {
                            continue;
                        }
                        if let Some(packet) = state.unacknowledged.get_mut(&idx) {
                            packet.send_time = now;
                            frames.push(packet.framed.clone());
                        }
                    }
                    frames
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
            let now = Instant::now();
            state.unacknowledged.insert(
                index,
                UnackedPacket {
                    framed: framed.clone(),
                    send_time: now,
                },
            );
            state.last_sent_time = Some(now);
            state.send_index += 1;
        }
        if let Some(handle) = self.handle.read().clone() {
            handle.continue_build(framed);
        }
    }
}
