//! Error types for sink construction and configuration.
//!
//! Recoverable send failures never show up here: per-record rejections and
//! transport errors are retried inside the send pipeline and producers get
//! no feedback about eventual delivery.

use std::time::Duration;

use crate::client::{StreamStatus, TransportError};

/// Errors returned by threshold and backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("record limit must be greater than zero")]
    ZeroRecordLimit,
    #[error("byte limit must be greater than zero")]
    ZeroByteLimit,
    #[error("flush interval must be greater than zero")]
    ZeroFlushInterval,
    #[error("backoff floor must be greater than zero")]
    ZeroBackoffFloor,
    #[error("backoff floor ({min:?}) must not exceed ceiling ({max:?})")]
    BackoffFloorAboveCeiling { min: Duration, max: Duration },
}

/// Errors surfaced while constructing a sink.
///
/// A sink is unusable without its destination, so anything here is fatal:
/// the sink never starts.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The destination stream is missing or not in a usable state.
    #[error("stream `{stream}` is not usable (status: {status})")]
    StreamUnusable { stream: String, status: StreamStatus },
    /// The status check itself failed.
    #[error("failed to check stream `{stream}`: {source}")]
    StatusCheck {
        stream: String,
        #[source]
        source: TransportError,
    },
    /// Invalid sink configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
