//! Remote stream client boundary.
//!
//! The sink talks to its destination through [`StreamClient`]. The results
//! of a multi-record put are positionally aligned with the submitted batch:
//! `results[i]` describes `records[i]`. Partial-failure retry depends on
//! that pairing, so any substitute transport must either preserve it or
//! replace it with an explicit per-record correlation scheme.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

/// A single event bound for the destination stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    payload: Bytes,
    partition_key: String,
}

impl Record {
    pub fn new(payload: Bytes, partition_key: impl Into<String>) -> Self {
        Self { payload, partition_key: partition_key.into() }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Destination stream state as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    Active,
    Updating,
    NotFound,
    Other(String),
}

impl StreamStatus {
    /// Whether the stream can accept records.
    pub fn is_usable(&self) -> bool {
        matches!(self, StreamStatus::Active | StreamStatus::Updating)
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamStatus::Active => write!(f, "ACTIVE"),
            StreamStatus::Updating => write!(f, "UPDATING"),
            StreamStatus::NotFound => write!(f, "NOT_FOUND"),
            StreamStatus::Other(status) => write!(f, "{}", status),
        }
    }
}

/// Per-record outcome of a multi-record put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordResult {
    Accepted,
    Failed { code: String, message: String },
}

impl RecordResult {
    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        RecordResult::Failed { code: code.into(), message: message.into() }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, RecordResult::Failed { .. })
    }
}

/// The call itself failed; no per-record results were produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stream transport error: {message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Client for a remote append-only stream service.
///
/// Implementations are stateless request/response handles; the sink shares
/// one across all concurrent sends without additional locking.
#[async_trait]
pub trait StreamClient: Send + Sync + fmt::Debug {
    /// Current status of the named stream.
    async fn stream_status(&self, stream: &str) -> Result<StreamStatus, TransportError>;

    /// Append `records` to the stream in order. The returned results are
    /// positionally aligned with `records`.
    async fn put_records(
        &self,
        stream: &str,
        records: &[Record],
    ) -> Result<Vec<RecordResult>, TransportError>;
}

/// Scripted outcome for one `put_records` call on a [`MemoryStreamClient`].
#[derive(Debug, Clone)]
pub enum ScriptedPut {
    /// Respond with these per-record results.
    Results(Vec<RecordResult>),
    /// Fail the call wholesale.
    Transport(TransportError),
}

/// In-memory stream client for tests and examples.
///
/// Captures every batch it receives, including attempts that fail. Outcomes
/// can be scripted per call; with no script queued, every record is
/// accepted.
#[derive(Debug)]
pub struct MemoryStreamClient {
    status: Mutex<StreamStatus>,
    batches: Mutex<Vec<Vec<Record>>>,
    script: Mutex<VecDeque<ScriptedPut>>,
}

impl Default for MemoryStreamClient {
    fn default() -> Self {
        Self {
            status: Mutex::new(StreamStatus::Active),
            batches: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
        }
    }
}

impl MemoryStreamClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, status: StreamStatus) {
        *self.status.lock().unwrap() = status;
    }

    /// Queue the outcome for the next unscripted `put_records` call.
    pub fn script_put(&self, outcome: ScriptedPut) {
        self.script.lock().unwrap().push_back(outcome);
    }

    /// Every batch received so far, in arrival order.
    pub fn batches(&self) -> Vec<Vec<Record>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait]
impl StreamClient for MemoryStreamClient {
    async fn stream_status(&self, _stream: &str) -> Result<StreamStatus, TransportError> {
        Ok(self.status.lock().unwrap().clone())
    }

    async fn put_records(
        &self,
        _stream: &str,
        records: &[Record],
    ) -> Result<Vec<RecordResult>, TransportError> {
        self.batches.lock().unwrap().push(records.to_vec());
        match self.script.lock().unwrap().pop_front() {
            Some(ScriptedPut::Results(results)) => Ok(results),
            Some(ScriptedPut::Transport(err)) => Err(err),
            None => Ok(vec![RecordResult::Accepted; records.len()]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tag: &'static str) -> Record {
        Record::new(Bytes::from_static(tag.as_bytes()), tag)
    }

    #[tokio::test]
    async fn memory_client_accepts_everything_by_default() {
        let client = MemoryStreamClient::new();
        let batch = vec![record("a"), record("b")];

        let results = client.put_records("events", &batch).await.unwrap();

        assert_eq!(results, vec![RecordResult::Accepted, RecordResult::Accepted]);
        assert_eq!(client.batches(), vec![batch]);
    }

    #[tokio::test]
    async fn memory_client_replays_script_in_order() {
        let client = MemoryStreamClient::new();
        client.script_put(ScriptedPut::Results(vec![RecordResult::failed("Throttled", "slow down")]));
        client.script_put(ScriptedPut::Transport(TransportError::new("connection reset")));

        let first = client.put_records("events", &[record("a")]).await.unwrap();
        assert!(first[0].is_failure());

        let second = client.put_records("events", &[record("a")]).await;
        assert_eq!(second, Err(TransportError::new("connection reset")));

        // Script exhausted: back to accepting.
        let third = client.put_records("events", &[record("a")]).await.unwrap();
        assert_eq!(third, vec![RecordResult::Accepted]);
        assert_eq!(client.batch_count(), 3);
    }

    #[tokio::test]
    async fn status_gates_usability() {
        let client = MemoryStreamClient::new();
        assert!(client.stream_status("events").await.unwrap().is_usable());

        client.set_status(StreamStatus::Updating);
        assert!(client.stream_status("events").await.unwrap().is_usable());

        client.set_status(StreamStatus::NotFound);
        assert!(!client.stream_status("events").await.unwrap().is_usable());

        client.set_status(StreamStatus::Other("DELETING".into()));
        assert!(!client.stream_status("events").await.unwrap().is_usable());
    }
}
