//! Wire frames for the reliable-delivery modules.
//!
//! Each module owns an independent wire format (single-byte method tag
//! followed by type-specific fields); none interprets the others' bytes.
//! Decoders return `None` on any malformed input (too short, unknown tag)
//! rather than an error — parsing failures are dropped silently by the
//! modules that own them, never surfaced upward.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

/// Frames for the `Acknowledgement` module (hash-keyed, fixed timeout).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckFrame {
    /// `0x00 | payload`
    Data { payload: Bytes },
    /// `0x01 | sha1(payload)`
    Acknowledge { hash: [u8; 20] },
}

impl AckFrame {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            AckFrame::Data { payload } => {
                buf.put_u8(0x00);
                buf.put_slice(payload);
            }
            AckFrame::Acknowledge { hash } => {
                buf.put_u8(0x01);
                buf.put_slice(hash);
            }
        }
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.is_empty() {
            trace!("ack frame decode: empty input, dropping");
            return None;
        }
        match data[0] {
            0x00 => Some(AckFrame::Data {
                payload: Bytes::copy_from_slice(&data[1..]),
            }),
            0x01 => {
                if data.len() < 1 + 20 {
                    trace!(len = data.len(), "ack frame decode: truncated hash, dropping");
                    return None;
                }
                let mut hash = [0u8; 20];
                hash.copy_from_slice(&data[1..21]);
                Some(AckFrame::Acknowledge { hash })
            }
            tag => {
                trace!(tag, "ack frame decode: unknown tag, dropping");
                None
            }
        }
    }
}

/// Frames for the `DynamicAcknowledgement` module (RTT-adaptive timeout,
/// Karn-disambiguated sampling via an explicit iteration counter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DynamicAckFrame {
    /// `0x00 | payload`
    Data { payload: Bytes },
    /// `0x01 | iteration:u8 | payload`
    Resend { iteration: u8, payload: Bytes },
    /// `0x02 | iteration:u8 | sha1(payload)`
    Acknowledge { iteration: u8, hash: [u8; 20] },
}

impl DynamicAckFrame {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            DynamicAckFrame::Data { payload } => {
                buf.put_u8(0x00);
                buf.put_slice(payload);
            }
            DynamicAckFrame::Resend { iteration, payload } => {
                buf.put_u8(0x01);
                buf.put_u8(*iteration);
                buf.put_slice(payload);
            }
            DynamicAckFrame::Acknowledge { iteration, hash } => {
                buf.put_u8(0x02);
                buf.put_u8(*iteration);
                buf.put_slice(hash);
            }
        }
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < 2 {
            trace!(len = data.len(), "dynamic ack frame decode: too short, dropping");
            return None;
        }
        match data[0] {
            0x00 => Some(DynamicAckFrame::Data {
                payload: Bytes::copy_from_slice(&data[1..]),
            }),
            0x01 => Some(DynamicAckFrame::Resend {
                iteration: data[1],
                payload: Bytes::copy_from_slice(&data[2..]),
            }),
            0x02 => {
                if data.len() < 2 + 20 {
                    trace!(len = data.len(), "dynamic ack frame decode: truncated hash, dropping");
                    return None;
                }
                let mut hash = [0u8; 20];
                hash.copy_from_slice(&data[2..22]);
                Some(DynamicAckFrame::Acknowledge {
                    iteration: data[1],
                    hash,
                })
            }
            tag => {
                trace!(tag, "dynamic ack frame decode: unknown tag, dropping");
                None
            }
        }
    }
}

/// Frames shared by the `Stream` and `DynamicStream` modules (sequence-
/// numbered sliding-window reliable ordered delivery).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// `0x00 | index:u32-LE | payload`
    Message { index: u32, payload: Bytes },
    /// `0x01 | index:u32-LE` — cumulative: everything up to `index` delivered.
    Acknowledgement { index: u32 },
    /// `0x02 | (index:u32-LE){k}` — explicit list of missing indices.
    Resend { indices: Vec<u32> },
}

impl StreamFrame {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            StreamFrame::Message { index, payload } => {
                buf.put_u8(0x00);
                buf.put_u32_le(*index);
                buf.put_slice(payload);
            }
            StreamFrame::Acknowledgement { index } => {
                buf.put_u8(0x01);
                buf.put_u32_le(*index);
            }
            StreamFrame::Resend { indices } => {
                buf.put_u8(0x02);
                for idx in indices {
                    buf.put_u32_le(*idx);
                }
            }
        }
        buf.freeze()
    }

    /// Decode a frame. Per the wire-format contract, inputs shorter than 5
    /// bytes are always malformed (every frame carries at least a tag and
    /// one `u32`) and decode to `None`.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < 5 {
            trace!(len = data.len(), "stream frame decode: too short, dropping");
            return None;
        }
        let tag = data[0];
        let mut rest = &data[1..];
        match tag {
            0x00 => {
                let index = rest.get_u32_le();
                Some(StreamFrame::Message {
                    index,
                    payload: Bytes::copy_from_slice(rest),
                })
            }
            0x01 => {
                let index = rest.get_u32_le();
                Some(StreamFrame::Acknowledgement { index })
            }
            0x02 => {
                if rest.len() % 4 != 0 {
                    trace!(len = rest.len(), "stream frame decode: misaligned resend indices, dropping");
                    return None;
                }
                let mut indices = Vec::with_capacity(rest.len() / 4);
                while rest.has_remaining() {
                    indices.push(rest.get_u32_le());
                }
                Some(StreamFrame::Resend { indices })
            }
            tag => {
                trace!(tag, "stream frame decode: unknown tag, dropping");
                None
            }
        }
    }
}
