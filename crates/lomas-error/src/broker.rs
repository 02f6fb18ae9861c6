use uuid::Uuid;

/// Errors from the Task Broker and its worker pool.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    /// No job with the given id is known to the broker.
    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    /// The backlog is at or above the high-water mark; try again later.
    #[error("backlog at or above the high-water mark, try again later")]
    Backpressure,

    /// The worker died before replying.
    #[error("worker died before replying: {0}")]
    WorkerLost(String),

    /// The reply channel closed before a terminal reply arrived.
    #[error("reply channel closed before a terminal reply arrived")]
    ReplyChannelClosed,

    /// Dispatch timed out after the given duration.
    #[error("dispatch timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl BrokerError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::JobNotFound(_) => "job_not_found",
            Self::Backpressure => "broker_backpressure",
            Self::WorkerLost(_) => "worker_lost",
            Self::ReplyChannelClosed => "reply_channel_closed",
            Self::Timeout(_) => "dispatch_timeout",
        }
    }
}
