//! Error types for reporting operations.

use crate::TaskId;

/// Error type for reporting, registration and flushing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The task was never begun in this context.
    #[error("unknown task {0}")]
    UnknownTask(TaskId),
    /// The task has already ended; its identifier must not be reused.
    #[error("task {0} has already finished")]
    RetiredTask(TaskId),
    /// The receiving end of the channel is gone.
    #[error("progress channel is disconnected")]
    Disconnected,
    /// The collector exited before presenting every pending event.
    #[error("collector exited before presenting all events")]
    CollectorExited,
    /// Talking to a reporter endpoint failed.
    #[error("reporter endpoint i/o failed: {0}")]
    Io(#[from] std::io::Error),
    /// An event could not be encoded for (or decoded from) a reporter endpoint.
    #[error("progress event could not be encoded: {0}")]
    Codec(#[from] serde_json::Error),
    /// The operation is not available on this platform.
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}
