#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # streamsink
//!
//! Buffered, batching sink for remote append-only stream services.
//!
//! Producers hand the sink small binary events; the sink accumulates them
//! in memory and forwards them in batches, decoupling low-latency
//! ingestion from rate- and size-limited network calls.
//!
//! ## How batches move
//!
//! - **Threshold flush**: crossing the record-count or byte limit flushes
//!   inline with the triggering `store`.
//! - **Time flush**: a drift-correcting scheduler flushes within one
//!   `max_age` interval of the previous flush, even when traffic is idle.
//! - **Retry**: per-record failures re-enqueue just the failed records
//!   with randomized, capped backoff; transport failures re-enqueue the
//!   whole batch. Retries repeat until shutdown.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use bytes::Bytes;
//! use streamsink::{BackoffPolicy, FlushThresholds, MemoryStreamClient, StreamSink};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(MemoryStreamClient::new());
//! let sink = StreamSink::builder(client, "events")
//!     .thresholds(FlushThresholds::new(500, 4_000_000, Duration::from_secs(5))?)
//!     .backoff(BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(10))?)
//!     .build()
//!     .await?;
//!
//! sink.store_raw_events([Bytes::from_static(b"event")], "shard-1");
//! sink.close().await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod buffer;
pub mod client;
pub mod clock;
pub mod error;
pub mod prelude;
pub mod scheduler;
pub mod sender;
pub mod sink;

// Re-exports
pub use backoff::BackoffPolicy;
pub use buffer::{BatchDispatcher, EventBuffer, FlushThresholds, MAX_RECORD_BYTES};
pub use client::{
    MemoryStreamClient, Record, RecordResult, ScriptedPut, StreamClient, StreamStatus,
    TransportError,
};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{ConfigError, SinkError};
pub use scheduler::{
    FlushScheduler, InstantSleeper, Sleeper, TaskScheduler, TokioSleeper, TrackingSleeper,
};
pub use sender::BatchSender;
pub use sink::{LifecycleState, StreamSink, StreamSinkBuilder, SHUTDOWN_TIMEOUT};
