//! Hash-keyed retransmission with RTT-adaptive timeout and Karn-style
//! disambiguation of round-trip samples under retransmission.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::time::{sleep, Duration, Instant};

use crate::frame::DynamicAckFrame;
use crate::hash::hash_payload;
use crate::pipeline::{Module, ModuleHandle};

/// Tuning knobs for [`DynamicAcknowledgement`].
#[derive(Debug, Clone, Copy)]
pub struct DynamicAckConfig {
    pub min_timeout: Duration,
    pub multiplier: f64,
    pub max_timeout: Duration,
}

impl Default for DynamicAckConfig {
    fn default() -> Self {
        Self {
            min_timeout: Duration::from_millis(1),
            multiplier: 2.0,
            max_timeout: Duration::from_millis(1000),
        }
    }
}

impl DynamicAckConfig {
    pub fn new(
        min_timeout: Duration,
        multiplier: f64,
        max_timeout: Duration,
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
        Ok(Self {
            min_timeout,
            multiplier,
            max_timeout,
        })
    }
}

struct Pending {
    payload: Bytes,
    /// Send time of the original transmission, tagged iteration 0.
    first_sent: Instant,
    /// `resend_times[i]` is the send time of the attempt tagged iteration `i + 1`.
    resend_times: Vec<Instant>,
}

impl Pending {
    fn last_sent(&self) -> Instant {
        self.resend_times.last().copied().unwrap_or(self.first_sent)
    }

    fn sent_at(&self, iteration: u8) -> Option<Instant> {
        if iteration == 0 {
            Some(self.first_sent)
        } else {
            self.resend_times.get(iteration as usize - 1).copied()
        }
    }
}

/// Re-emits an unacknowledged payload, escalating an iteration counter each
/// attempt so the matching acknowledgement can be attributed to the exact
/// transmission that triggered it rather than the original send.
pub struct DynamicAcknowledgement {
    config: DynamicAckConfig,
    pending: Mutex<HashMap<[u8; 20], Pending>>,
    /// Learned round-trip estimate, `None` until the first sample arrives.
    timeout: RwLock<Option<Duration>>,
    handle: RwLock<Option<ModuleHandle>>,
    timer_started: AtomicBool,
}

impl DynamicAcknowledgement {
    pub fn new(config: DynamicAckConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            pending: Mutex::new(HashMap::new()),
            timeout: RwLock::new(None),
            handle: RwLock::new(None),
            timer_started: AtomicBool::new(false),
        })
    }

    fn effective_timeout(&self) -> Option<Duration> {
        self.timeout
            .read()
            .map(|t| t.mul_f64(self.config.multiplier).max(self.config.min_timeout))
    }

    async fn run_timer(self: Arc<Self>) {
        loop {
            sleep(Duration::from_millis(10)).await;
            let now = Instant::now();
            let effective = self.effective_timeout();
            let due: Vec<(Bytes, u8)> = {
                let mut pending = self.pending.lock();
                let mut due = Vec::new();
                for entry in pending.values_mut() {
                    let elapsed = now.saturating_duration_since(entry.last_sent());
                    let should_fire = elapsed >= self.config.max_timeout
                        || effective.is_some_and(|e| elapsed >= e);
                    if should_fire {
                        // Iteration is a single byte on the wire; once it
                        // saturates, further attempts keep resending under
                        // the final iteration value rather than wrapping
                        // back to an attempt number already in use.
                        let attempt_count = entry.resend_times.len() + 1;
                        let next_iteration = attempt_count.min(u8::MAX as usize) as u8;
                        entry.resend_times.push(now);
                        due.push((entry.payload.clone(), next_iteration));
                    }
                }
                due
            };
            if due.is_empty() {
                continue;
            }
            if let Some(handle) = self.handle.read().clone() {
                for (payload, iteration) in due {
                    let frame = DynamicAckFrame::Resend { iteration, payload }.encode();
                    handle.continue_build(frame);
                }
            }
        }
    }
}

impl Module for DynamicAcknowledgement {
    fn bind(self: Arc<Self>, handle: ModuleHandle) {
        *self.handle.write() = Some(handle);
        if !self.timer_started.swap(true, Ordering::SeqCst) {
            let this = Arc::clone(&self);
            tokio::spawn(this.run_timer());
        }
    }

    fn read(&self, data: Bytes) {
        match DynamicAckFrame::decode(&data) {
            Some(DynamicAckFrame::Data { payload }) => {
                let hash = hash_payload(&payload);
                let ack = DynamicAckFrame::Acknowledge { iteration: 0, hash }.encode();
                if let Some(handle) = self.handle.read().clone() {
                    handle.continue_read(payload);
                    handle.continue_build(ack);
                }
            }
            Some(DynamicAckFrame::Resend { iteration, payload }) => {
                let hash = hash_payload(&payload);
                let ack = DynamicAckFrame::Acknowledge { iteration, hash }.encode();
                if let Some(handle) = self.handle.read().clone() {
                    handle.continue_read(payload);
                    handle.continue_build(ack);
                }
            }
            Some(DynamicAckFrame::Acknowledge { iteration, hash }) => {
                let sample = {
                    let mut pending = self.pending.lock();
                    match pending.remove(&hash) {
                        Some(entry) => {
                            let sample = entry
                                .sent_at(iteration)
                                .map(|sent_at| Instant::now().saturating_duration_since(sent_at));
                            if sample.is_none() {
                                tracing::debug!(iteration, "acknowledgement names an iteration never sent, ignoring");
                            }
                            sample
                        }
                        None => {
                            tracing::debug!("acknowledgement for unknown or already-cleared hash, ignoring");
                            None
                        }
                    }
                };
                if let Some(sample) = sample {
                    *self.timeout.write() = Some(sample);
                }
            }
            None => {}
        }
    }

    fn build(&self, data: Bytes) {
        let hash = hash_payload(&data);
        let framed = DynamicAckFrame::Data {
            payload: data.clone(),
        }
        .encode();
        self.pending.lock().insert(
            hash,
            Pending {
                payload: data,
                first_sent: Instant::now(),
                resend_times: Vec::new(),
            },
        );
        if let Some(handle) = self.handle.read().clone() {
            handle.continue_build(framed);
        }
    }
}
