//! The four reliable-delivery transformer modules.

pub mod acknowledgement;
pub mod dynamic_acknowledgement;
pub mod dynamic_stream;
pub mod stream;
mod stream_common;

pub use acknowledgement::{AckConfig, Acknowledgement};
pub use dynamic_acknowledgement::{DynamicAckConfig, DynamicAcknowledgement};
pub use dynamic_stream::{DynamicStream, DynamicStreamConfig};
pub use stream::{Stream, StreamConfig};
