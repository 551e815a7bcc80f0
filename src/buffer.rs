//! Thread-safe accumulator of pending records.
//!
//! Producers call [`EventBuffer::store`] from any thread. The pending batch
//! and its byte counter live behind one mutex; the last-flush timestamp is
//! an atomic so the flush scheduler can read it without contending with
//! writers. Crossing the record or byte limit flushes inline on the calling
//! thread; the time limit is enforced separately by the flush scheduler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::warn;

use crate::client::Record;
use crate::clock::Clock;
use crate::error::ConfigError;

/// Largest payload the destination accepts per record. Oversized records
/// are dropped on `store`, never buffered and never retried.
pub const MAX_RECORD_BYTES: usize = 1_000_000;

/// Flush trigger limits.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlushThresholds {
    max_records: usize,
    max_bytes: usize,
    max_age: Duration,
}

impl FlushThresholds {
    /// Create thresholds, rejecting zero limits.
    pub fn new(
        max_records: usize,
        max_bytes: usize,
        max_age: Duration,
    ) -> Result<Self, ConfigError> {
        if max_records == 0 {
            return Err(ConfigError::ZeroRecordLimit);
        }
        if max_bytes == 0 {
            return Err(ConfigError::ZeroByteLimit);
        }
        if max_age.is_zero() {
            return Err(ConfigError::ZeroFlushInterval);
        }
        Ok(Self { max_records, max_bytes, max_age })
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }
}

impl Default for FlushThresholds {
    /// 500 records, 4 MB, 5 seconds.
    fn default() -> Self {
        Self { max_records: 500, max_bytes: 4_000_000, max_age: Duration::from_secs(5) }
    }
}

/// Receives flushed batches for asynchronous dispatch.
///
/// `dispatch` must not block: it runs on whatever thread triggered the
/// flush, including producer threads.
pub trait BatchDispatcher: Send + Sync + std::fmt::Debug {
    fn dispatch(&self, batch: Vec<Record>);
}

#[derive(Debug, Default)]
struct Pending {
    records: Vec<Record>,
    bytes: usize,
}

/// Accumulates records until a flush trigger fires.
#[derive(Debug)]
pub struct EventBuffer {
    pending: Mutex<Pending>,
    last_flush_ms: AtomicU64,
    thresholds: FlushThresholds,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<dyn BatchDispatcher>,
}

impl EventBuffer {
    pub fn new(
        thresholds: FlushThresholds,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<dyn BatchDispatcher>,
    ) -> Self {
        let now = clock.now_millis();
        Self {
            pending: Mutex::new(Pending::default()),
            last_flush_ms: AtomicU64::new(now),
            thresholds,
            clock,
            dispatcher,
        }
    }

    /// Accept one record.
    ///
    /// Oversized payloads are dropped and logged. If the mutation pushes
    /// the pending batch over the record or byte limit, the batch is
    /// drained in the same critical section and flushed inline before
    /// `store` returns.
    pub fn store(&self, record: Record) {
        if record.len() >= MAX_RECORD_BYTES {
            warn!(
                size = record.len(),
                limit = MAX_RECORD_BYTES,
                partition_key = record.partition_key(),
                "dropping oversized record"
            );
            return;
        }
        let triggered = {
            let mut pending = self.pending.lock().unwrap();
            pending.bytes += record.len();
            pending.records.push(record);
            if pending.records.len() >= self.thresholds.max_records
                || pending.bytes >= self.thresholds.max_bytes
            {
                Some(Self::drain(&mut pending))
            } else {
                None
            }
        };
        if let Some(batch) = triggered {
            self.complete_flush(batch);
        }
    }

    /// Snapshot and clear the pending batch, stamp the flush time, and hand
    /// the snapshot off for dispatch.
    ///
    /// The lock is released before dispatch, and the timestamp is updated
    /// even when the snapshot is empty. Does not wait for the send.
    pub fn flush(&self) {
        let batch = {
            let mut pending = self.pending.lock().unwrap();
            Self::drain(&mut pending)
        };
        self.complete_flush(batch);
    }

    /// Timestamp of the most recent flush, readable without the buffer
    /// lock.
    pub fn last_flush_millis(&self) -> u64 {
        self.last_flush_ms.load(Ordering::Acquire)
    }

    pub fn pending_records(&self) -> usize {
        self.pending.lock().unwrap().records.len()
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending.lock().unwrap().bytes
    }

    fn drain(pending: &mut Pending) -> Vec<Record> {
        pending.bytes = 0;
        std::mem::take(&mut pending.records)
    }

    fn complete_flush(&self, batch: Vec<Record>) {
        self.last_flush_ms.store(self.clock.now_millis(), Ordering::Release);
        self.dispatcher.dispatch(batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use bytes::Bytes;

    #[derive(Debug, Default)]
    struct RecordingDispatcher {
        batches: Mutex<Vec<Vec<Record>>>,
    }

    impl RecordingDispatcher {
        fn batches(&self) -> Vec<Vec<Record>> {
            self.batches.lock().unwrap().clone()
        }
    }

    impl BatchDispatcher for RecordingDispatcher {
        fn dispatch(&self, batch: Vec<Record>) {
            self.batches.lock().unwrap().push(batch);
        }
    }

    fn record(payload: &'static str) -> Record {
        Record::new(Bytes::from_static(payload.as_bytes()), "key")
    }

    fn buffer(
        max_records: usize,
        max_bytes: usize,
    ) -> (EventBuffer, Arc<RecordingDispatcher>, Arc<ManualClock>) {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let clock = Arc::new(ManualClock::new(1_000));
        let thresholds =
            FlushThresholds::new(max_records, max_bytes, Duration::from_secs(5)).unwrap();
        let buffer = EventBuffer::new(thresholds, clock.clone(), dispatcher.clone());
        (buffer, dispatcher, clock)
    }

    #[test]
    fn accumulates_below_thresholds_without_dispatch() {
        let (buffer, dispatcher, _clock) = buffer(5, 1_000);

        buffer.store(record("aa"));
        buffer.store(record("bbb"));

        assert!(dispatcher.batches().is_empty());
        assert_eq!(buffer.pending_records(), 2);
        assert_eq!(buffer.pending_bytes(), 5);
    }

    #[test]
    fn record_threshold_flushes_inline_in_order() {
        let (buffer, dispatcher, _clock) = buffer(2, 1_000);

        buffer.store(record("first"));
        buffer.store(record("second"));

        let batches = dispatcher.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec![record("first"), record("second")]);
        assert_eq!(buffer.pending_records(), 0);
        assert_eq!(buffer.pending_bytes(), 0);
    }

    #[test]
    fn byte_threshold_flushes_inline() {
        let (buffer, dispatcher, _clock) = buffer(100, 8);

        buffer.store(record("1234"));
        assert!(dispatcher.batches().is_empty());

        buffer.store(record("5678"));
        assert_eq!(dispatcher.batches().len(), 1);
        assert_eq!(buffer.pending_bytes(), 0);
    }

    #[test]
    fn oversized_record_is_dropped() {
        let (buffer, dispatcher, _clock) = buffer(5, 10_000_000);

        buffer.store(Record::new(Bytes::from(vec![0u8; MAX_RECORD_BYTES]), "key"));

        assert!(dispatcher.batches().is_empty());
        assert_eq!(buffer.pending_records(), 0);
        assert_eq!(buffer.pending_bytes(), 0);
    }

    #[test]
    fn payload_just_under_the_limit_is_accepted() {
        let (buffer, dispatcher, _clock) = buffer(5, 10_000_000);

        buffer.store(Record::new(Bytes::from(vec![0u8; MAX_RECORD_BYTES - 1]), "key"));

        assert!(dispatcher.batches().is_empty());
        assert_eq!(buffer.pending_records(), 1);
        assert_eq!(buffer.pending_bytes(), MAX_RECORD_BYTES - 1);
    }

    #[test]
    fn flush_resets_state_and_stamps_time() {
        let (buffer, dispatcher, clock) = buffer(100, 1_000);
        buffer.store(record("payload"));
        clock.advance_millis(250);

        buffer.flush();

        assert_eq!(dispatcher.batches(), vec![vec![record("payload")]]);
        assert_eq!(buffer.pending_records(), 0);
        assert_eq!(buffer.pending_bytes(), 0);
        assert_eq!(buffer.last_flush_millis(), 1_250);
    }

    #[test]
    fn empty_flush_still_stamps_time() {
        let (buffer, dispatcher, clock) = buffer(100, 1_000);
        clock.advance_millis(500);

        buffer.flush();

        assert_eq!(buffer.last_flush_millis(), 1_500);
        // The empty snapshot is still handed off; the sender ignores it.
        assert_eq!(dispatcher.batches(), vec![Vec::new()]);
    }

    #[test]
    fn single_producer_order_is_preserved() {
        let (buffer, dispatcher, _clock) = buffer(5, 1_000);
        for payload in ["e1", "e2", "e3", "e4", "e5"] {
            buffer.store(record(payload));
        }

        let batches = dispatcher.batches();
        assert_eq!(batches.len(), 1);
        let payloads: Vec<&[u8]> = batches[0].iter().map(|r| r.payload().as_ref()).collect();
        assert_eq!(payloads, vec![b"e1" as &[u8], b"e2", b"e3", b"e4", b"e5"]);
    }

    #[test]
    fn concurrent_stores_lose_nothing() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let clock = Arc::new(ManualClock::new(0));
        let thresholds = FlushThresholds::new(10_000, 100_000_000, Duration::from_secs(5)).unwrap();
        let buffer = Arc::new(EventBuffer::new(thresholds, clock, dispatcher.clone()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let buffer = Arc::clone(&buffer);
            handles.push(std::thread::spawn(move || {
                for _ in 0..250 {
                    buffer.store(record("xy"));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(buffer.pending_records(), 1_000);
        assert_eq!(buffer.pending_bytes(), 2_000);
        assert!(dispatcher.batches().is_empty());
    }
}
