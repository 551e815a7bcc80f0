//! Asynchronous batch dispatch with partial-failure retry.
//!
//! A flushed batch is sent to the destination stream off the flushing
//! thread. Per-record failures re-enqueue just the failed records;
//! transport failures re-enqueue the whole batch. Retries repeat
//! indefinitely: there is no attempt cap and no circuit breaker, so a
//! permanently failing destination produces retry traffic until shutdown
//! rather than data loss of buffered records.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, warn};

use crate::backoff::BackoffPolicy;
use crate::buffer::BatchDispatcher;
use crate::client::{Record, RecordResult, StreamClient};
use crate::scheduler::TaskScheduler;

/// Sends flushed batches to the destination stream and retries failures.
#[derive(Debug, Clone)]
pub struct BatchSender {
    inner: Arc<SenderInner>,
}

#[derive(Debug)]
struct SenderInner {
    client: Arc<dyn StreamClient>,
    stream: String,
    policy: BackoffPolicy,
    scheduler: Arc<TaskScheduler>,
}

impl BatchSender {
    pub fn new(
        client: Arc<dyn StreamClient>,
        stream: impl Into<String>,
        policy: BackoffPolicy,
        scheduler: Arc<TaskScheduler>,
    ) -> Self {
        Self {
            inner: Arc::new(SenderInner {
                client,
                stream: stream.into(),
                policy,
                scheduler,
            }),
        }
    }

    /// Queue `batch` for an asynchronous send. Does not block the caller;
    /// empty batches are ignored.
    pub fn send(&self, batch: Vec<Record>) {
        if batch.is_empty() {
            return;
        }
        let records = batch.len();
        let initial = self.inner.policy.floor();
        let inner = Arc::clone(&self.inner);
        if !self.inner.scheduler.spawn(inner.send_batch(batch, initial)) {
            warn!(records, stream = %self.inner.stream, "scheduler stopped; dropping batch");
        }
    }
}

impl BatchDispatcher for BatchSender {
    fn dispatch(&self, batch: Vec<Record>) {
        self.send(batch);
    }
}

impl SenderInner {
    /// One attempt at `batch`. `backoff` is the wait this attempt would
    /// charge before its own retry; the value threaded to that retry is
    /// computed fresh, so backoff growth lags the waits by one attempt.
    fn send_batch(self: Arc<Self>, batch: Vec<Record>, backoff: Duration) -> BoxFuture<'static, ()> {
        async move {
            if batch.is_empty() {
                return;
            }
            let total = batch.len();
            debug!(records = total, stream = %self.stream, "sending batch");
            match self.client.put_records(&self.stream, &batch).await {
                Ok(results) if results.len() != batch.len() => {
                    warn!(
                        records = total,
                        results = results.len(),
                        stream = %self.stream,
                        "result count does not match batch; treating as transport failure"
                    );
                    self.schedule_retry(batch, backoff);
                }
                Ok(results) => {
                    let mut failed = Vec::new();
                    for (record, result) in batch.into_iter().zip(results) {
                        if let RecordResult::Failed { code, message } = result {
                            warn!(
                                code = %code,
                                message = %message,
                                partition_key = record.partition_key(),
                                stream = %self.stream,
                                "record rejected"
                            );
                            failed.push(record);
                        }
                    }
                    if failed.is_empty() {
                        debug!(records = total, stream = %self.stream, "batch delivered");
                    } else {
                        self.schedule_retry(failed, backoff);
                    }
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        records = total,
                        stream = %self.stream,
                        "put failed; retrying whole batch"
                    );
                    self.schedule_retry(batch, backoff);
                }
            }
        }
        .boxed()
    }

    /// Wait out `backoff`, then resend `batch` with a freshly drawn delay
    /// as its retry basis.
    fn schedule_retry(self: Arc<Self>, batch: Vec<Record>, backoff: Duration) {
        let next = self.policy.next_delay(backoff);
        let records = batch.len();
        warn!(records, wait = ?backoff, stream = %self.stream, "scheduling retry");
        let scheduler = Arc::clone(&self.scheduler);
        let stream = self.stream.clone();
        if !scheduler.spawn_after(backoff, Arc::clone(&self).send_batch(batch, next)) {
            warn!(records, stream = %stream, "scheduler stopped; dropping retry");
        }
    }
}
