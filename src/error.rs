use thiserror::Error;

/// Errors surfaced at the pipeline's construction-time boundary.
///
/// Malformed or out-of-window frames are not represented here: per-module
/// wire parsing is tolerant by design (see `frame` decoders) and recovers
/// silently through retransmission rather than raising an error upward.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid timeout configuration: {0}")]
    InvalidTimeout(String),

    #[error("invalid receive buffer size: {0}")]
    InvalidWindow(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
