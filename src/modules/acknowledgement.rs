//! Hash-keyed stop-and-go retransmission with a fixed timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::time::{sleep, Duration, Instant};

use crate::frame::AckFrame;
use crate::hash::hash_payload;
use crate::pipeline::{Module, ModuleHandle};

/// Tuning knobs for [`Acknowledgement`].
#[derive(Debug, Clone, Copy)]
pub struct AckConfig {
    pub timeout: Duration,
}

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
        }
    }
}

impl AckConfig {
    pub fn new(timeout: Duration) -> crate::error::Result<Self> {
        if timeout.is_zero() {
            return Err(crate::error::PipelineError::InvalidTimeout(
                "timeout must be greater than zero".into(),
            ));
        }
        Ok(Self { timeout })
    }
}

struct Pending {
    framed: Bytes,
    last_sent: Instant,
}

/// Re-emits an unacknowledged `Data` frame on a fixed cadence until the
/// matching `Acknowledge` arrives. No backoff, no attempt cap.
pub struct Acknowledgement {
    config: AckConfig,
    pending: Mutex<HashMap<[u8; 20], Pending>>,
    handle: RwLock<Option<ModuleHandle>>,
    timer_started: AtomicBool,
}

impl Acknowledgement {
    pub fn new(config: AckConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            pending: Mutex::new(HashMap::new()),
            handle: RwLock::new(None),
            timer_started: AtomicBool::new(false),
        })
    }

    async fn run_timer(self: Arc<Self>) {
        loop {
            sleep(Duration::from_millis(10)).await;
            let now = Instant::now();
            let due: Vec<Bytes> = {
                let mut pending = self.pending.lock();
                let mut due = Vec::new();
                for entry in pending.values_mut() {
                    if now.saturating_duration_since(entry.last_sent) >= self.config.timeout {
                        due.push(entry.framed.clone());
                        entry.last_sent = now;
                    }
                }
                due
            };
            if due.is_empty() {
                continue;
            }
            if let Some(handle) = self.handle.read().clone() {
                for frame in due {
                    handle.continue_build(frame);
                }
            }
        }
    }
}

impl Module for Acknowledgement {
    fn bind(self: Arc<Self>, handle: ModuleHandle) {
        *self.handle.write() = Some(handle);
        if !self.timer_started.swap(true, Ordering::SeqCst) {
            let this = Arc::clone(&self);
            tokio::spawn(this.run_timer());
        }
    }

    fn read(&self, data: Bytes) {
        match AckFrame::decode(&data) {
            Some(AckFrame::Data { payload }) => {
                let hash = hash_payload(&payload);
                let ack = AckFrame::Acknowledge { hash }.encode();
                if let Some(handle) = self.handle.read().clone() {
                    handle.continue_read(payload);
                    handle.continue_build(ack);
                }
            }
            Some(AckFrame::Acknowledge { hash }) => {
                if self.pending.lock().remove(&hash).is_none() {
                    tracing::debug!("acknowledgement for unknown or already-cleared hash, ignoring");
                }
            }
            None => {}
        }
    }

    fn build(&self, data: Bytes) {
        let hash = hash_payload(&data);
        let framed = AckFrame::Data { payload: data }.encode();
        self.pending.lock().insert(
            hash,
            Pending {
                framed: framed.clone(),
                last_sent: Instant::now(),
            },
        );
        if let Some(handle) = self.handle.read().clone() {
            handle.continue_build(framed);
        }
    }
}
