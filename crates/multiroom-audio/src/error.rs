//! Error types for audio server operations.

use thiserror::Error;

/// Audio server operation failures.
#[derive(Error, Debug)]
pub enum AudioError {
    /// The audio server did not answer within the readiness budget.
    #[error("audio server unavailable")]
    Unavailable,

    /// Loading a loopback kept failing after every retry.
    #[error("could not load loopback for sink {sink}")]
    LoopbackLoad { sink: String },

    /// The sink for a connected speaker never appeared in the sink list.
    #[error("sink {sink} did not appear")]
    SinkMissing { sink: String },

    /// A `pactl` invocation failed.
    #[error("audio command failed: {0}")]
    Command(String),

    /// Output of a listing could not be parsed.
    #[error("unparseable audio server output: {0}")]
    Parse(String),

    /// Could not spawn the control utility at all.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type for audio operations.
pub type Result<T> = std::result::Result<T, AudioError>;
