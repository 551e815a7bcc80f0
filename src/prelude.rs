//! Convenient re-exports for common streamsink types.
pub use crate::{
    backoff::BackoffPolicy,
    buffer::{FlushThresholds, MAX_RECORD_BYTES},
    client::{Record, RecordResult, StreamClient, StreamStatus, TransportError},
    error::{ConfigError, SinkError},
    sink::{LifecycleState, StreamSink, StreamSinkBuilder, SHUTDOWN_TIMEOUT},
};
