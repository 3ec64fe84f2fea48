use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::ids::RoomId;

/// The durable, totally-ordered stream export jobs are appended to.
pub const EXPORT_JOBS_STREAM: &str = "export-jobs";

/// Returns the room-scoped pub/sub topic for a room id.
pub fn room_topic(room_id: &RoomId) -> String {
    format!("room:{room_id}")
}

#[derive(Debug, Error)]
pub enum BusError {
    /// The bus is temporarily unavailable; the caller should retry with
    /// exponential backoff (publish) or treat the operation as failed
    /// (append, which the caller escalates to a 5xx per spec §4.1).
    #[error("event bus is temporarily unavailable: {0}")]
    Transient(String),
    #[error("event bus subscription ended unexpectedly: {0}")]
    StreamEnded(String),
}

/// An opaque position within a durable job stream. Concrete buses use this to
/// represent e.g. a Redis Streams entry id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobOffset(pub String);

/// A message read off a durable job stream, paired with the offset needed to
/// acknowledge it.
#[derive(Debug, Clone)]
pub struct JobMessage {
    pub offset: JobOffset,
    pub payload: Vec<u8>,
}

/// Process-external pub/sub used for cross-node fan-out of room events, and a
/// durable ordered job stream with consumer-group semantics for export jobs.
///
/// Room topics are at-most-once: missed messages are not replayed, and
/// clients are expected to re-read `AuthorityStore` on reconnect. The job
/// stream is durable and ordered: each message is delivered to exactly one
/// consumer within a group, acknowledged, and redelivered after a visibility
/// timeout if unacked.
#[async_trait]
pub trait EventBus: Send + Sync + 'static {
    /// Publishes `payload` to `topic`. At-most-once, no replay.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Subscribes to `topic`, yielding every message published to it from
    /// this point on. The stream ends on irrecoverable disconnect; callers
    /// are expected to resubscribe and tolerate missed messages in between.
    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, Vec<u8>>, BusError>;

    /// Durably appends `payload` to `stream_key`, returning its offset.
    /// Callers may assume success once this returns `Ok`.
    async fn append_job(&self, stream_key: &str, payload: Vec<u8>) -> Result<JobOffset, BusError>;

    /// Consumes `stream_key` as part of `group` under the identity
    /// `consumer`. Each message goes to exactly one consumer in the group.
    async fn consume_jobs(
        &self,
        stream_key: &str,
        group: &str,
        consumer: &str,
    ) -> Result<BoxStream<'static, JobMessage>, BusError>;

    /// Acknowledges a previously consumed job message, preventing redelivery.
    async fn ack_job(&self, stream_key: &str, group: &str, offset: JobOffset) -> Result<(), BusError>;
}
