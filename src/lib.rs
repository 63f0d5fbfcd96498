//! A modular packet-processing pipeline that turns a raw, unreliable,
//! possibly lossy and reordering byte transport into a reliable and/or
//! ordered byte-message channel.
//!
//! A [`pipeline::Pipeline`] drives an ordered stack of [`pipeline::Module`]s.
//! Four ready-made modules cover the hard engineering: hash-acknowledged
//! retransmission ([`modules::Acknowledgement`], and its RTT-adaptive sibling
//! [`modules::DynamicAcknowledgement`]) and sequence-numbered sliding-window
//! ordered delivery ([`modules::Stream`], and its RTT-adaptive sibling
//! [`modules::DynamicStream`]).
//!
//! What this crate does not do: ship bytes between peers, produce or
//! consume application messages, load configuration, or log on the
//! caller's behalf beyond its own internal `tracing` spans.

pub mod error;
pub mod frame;
pub mod hash;
pub mod modules;
pub mod pipeline;

pub use error::{PipelineError, Result};
pub use modules::{
    AckConfig, Acknowledgement, DynamicAckConfig, DynamicAcknowledgement, DynamicStream,
    DynamicStreamConfig, Stream, StreamConfig,
};
pub use pipeline::{Module, ModuleHandle, Pipeline};
