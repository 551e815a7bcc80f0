//! Sink orchestration and lifecycle.
//!
//! [`StreamSink`] wires the buffer, sender, and schedulers together around
//! a validated destination stream. Producers call
//! [`StreamSink::store_raw_events`] and never block on network I/O; the
//! only blocking they do is the brief critical section inside the buffer.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::buffer::{EventBuffer, FlushThresholds};
use crate::client::{Record, StreamClient};
use crate::clock::{Clock, MonotonicClock};
use crate::error::SinkError;
use crate::scheduler::{FlushScheduler, Sleeper, TaskScheduler, TokioSleeper};
use crate::sender::BatchSender;

/// How long `shutdown` waits for in-flight scheduled work.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Sink lifecycle, transitioned exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    ShuttingDown,
}

/// Once-only `Running -> ShuttingDown` switch, observed by the flush loop.
#[derive(Debug)]
struct Lifecycle {
    state: watch::Sender<LifecycleState>,
}

impl Lifecycle {
    fn new() -> Self {
        Self { state: watch::Sender::new(LifecycleState::Running) }
    }

    /// Returns `true` on the transition, `false` when already shutting
    /// down.
    fn begin_shutdown(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == LifecycleState::Running {
                *state = LifecycleState::ShuttingDown;
                true
            } else {
                false
            }
        })
    }

    fn current(&self) -> LifecycleState {
        *self.state.borrow()
    }

    fn watch(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }
}

/// Buffered, batching sink for a remote append-only stream.
#[derive(Debug)]
pub struct StreamSink {
    stream: String,
    buffer: Arc<EventBuffer>,
    scheduler: Arc<TaskScheduler>,
    lifecycle: Lifecycle,
}

impl StreamSink {
    /// Start building a sink for `stream` backed by `client`.
    pub fn builder(client: Arc<dyn StreamClient>, stream: impl Into<String>) -> StreamSinkBuilder {
        StreamSinkBuilder {
            client,
            stream: stream.into(),
            thresholds: FlushThresholds::default(),
            backoff: BackoffPolicy::default(),
            clock: Arc::new(MonotonicClock::default()),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Buffer raw event payloads under one partition key.
    ///
    /// Always returns an empty list: every payload was accepted into the
    /// buffer (oversized payloads are dropped and logged), and nothing is
    /// known yet about eventual delivery.
    pub fn store_raw_events<I>(&self, payloads: I, partition_key: &str) -> Vec<Bytes>
    where
        I: IntoIterator<Item = Bytes>,
    {
        for payload in payloads {
            self.buffer.store(Record::new(payload, partition_key));
        }
        Vec::new()
    }

    /// Flush whatever is buffered right now.
    pub fn flush(&self) {
        self.buffer.flush();
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.current()
    }

    /// Stop accepting new scheduled work and wait, bounded by
    /// [`SHUTDOWN_TIMEOUT`], for in-flight sends and retries.
    ///
    /// Does not flush the buffer; [`StreamSink::close`] does that first.
    pub async fn shutdown(&self) {
        self.lifecycle.begin_shutdown();
        self.scheduler.stop();
        if !self.scheduler.drain(SHUTDOWN_TIMEOUT).await {
            warn!(
                stream = %self.stream,
                active = self.scheduler.active_tasks(),
                "shutdown timed out with tasks still in flight"
            );
        }
        debug!(stream = %self.stream, "sink shut down");
    }

    /// Process-exit hook body: mark the sink as shutting down, flush the
    /// remaining buffer, then shut down.
    pub async fn close(&self) {
        if self.lifecycle.begin_shutdown() {
            debug!(
                stream = %self.stream,
                pending = self.buffer.pending_records(),
                "closing sink"
            );
        }
        self.buffer.flush();
        self.shutdown().await;
    }
}

/// Builder for [`StreamSink`].
#[derive(Debug)]
pub struct StreamSinkBuilder {
    client: Arc<dyn StreamClient>,
    stream: String,
    thresholds: FlushThresholds,
    backoff: BackoffPolicy,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl StreamSinkBuilder {
    /// Set flush trigger limits.
    pub fn thresholds(mut self, thresholds: FlushThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Set the retry backoff bounds.
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Provide a custom clock implementation.
    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Validate the destination and start the sink.
    ///
    /// Fails unless the stream reports `ACTIVE` or `UPDATING`: a sink
    /// without a usable destination never starts.
    pub async fn build(self) -> Result<StreamSink, SinkError> {
        let status = self
            .client
            .stream_status(&self.stream)
            .await
            .map_err(|source| SinkError::StatusCheck { stream: self.stream.clone(), source })?;
        if !status.is_usable() {
            return Err(SinkError::StreamUnusable { stream: self.stream, status });
        }
        info!(stream = %self.stream, %status, "destination stream ready");

        let scheduler = TaskScheduler::new(Arc::clone(&self.sleeper));
        let sender = BatchSender::new(
            Arc::clone(&self.client),
            self.stream.clone(),
            self.backoff,
            Arc::clone(&scheduler),
        );
        let max_age = self.thresholds.max_age();
        let buffer = Arc::new(EventBuffer::new(
            self.thresholds,
            Arc::clone(&self.clock),
            Arc::new(sender),
        ));
        let lifecycle = Lifecycle::new();

        let flusher = FlushScheduler::new(
            Arc::clone(&buffer),
            max_age,
            Arc::clone(&self.clock),
            Arc::clone(&self.sleeper),
        );
        scheduler.spawn(flusher.run(lifecycle.watch()));

        Ok(StreamSink { stream: self.stream, buffer, scheduler, lifecycle })
    }
}
