use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use poker_core::{BusError, EventBus, JobMessage, JobOffset};
use tokio::sync::broadcast;
use tokio::sync::Notify;
use tokio_stream::wrappers::BroadcastStream;

#[derive(Clone)]
struct JobQueue {
    pending: Arc<Mutex<VecDeque<JobMessage>>>,
    notify: Arc<Notify>,
}

impl JobQueue {
    fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(VecDeque::new())),
            notify: Arc::new(Notify::new()),
        }
    }

    fn push(&self, message: JobMessage) {
        self.pending.lock().push_back(message);
        self.notify.notify_one();
    }
}

/// An in-process [EventBus] for tests and single-node development. Room
/// topics ride a `tokio::sync::broadcast` channel per topic, matching the
/// at-most-once, no-replay contract of the Redis-backed bus. The job stream
/// is a single FIFO queue per stream key with no redelivery on crash and no
/// real consumer-group fan-out: every registered consumer group drains the
/// same queue, so this is only valid with one active consumer per stream.
/// Never use this across more than one process.
#[derive(Default)]
pub struct InMemoryBus {
    topics: DashMap<String, broadcast::Sender<Vec<u8>>>,
    streams: DashMap<String, JobQueue>,
    next_offset: AtomicU64,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic_sender(&self, topic: &str) -> broadcast::Sender<Vec<u8>> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }

    fn job_queue(&self, stream_key: &str) -> JobQueue {
        self.streams
            .entry(stream_key.to_string())
            .or_insert_with(JobQueue::new)
            .clone()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let _ = self.topic_sender(topic).send(payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, Vec<u8>>, BusError> {
        let receiver = self.topic_sender(topic).subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(|item| async move { item.ok() });
        Ok(stream.boxed())
    }

    async fn append_job(&self, stream_key: &str, payload: Vec<u8>) -> Result<JobOffset, BusError> {
        let offset = JobOffset(self.next_offset.fetch_add(1, Ordering::SeqCst).to_string());

        self.job_queue(stream_key).push(JobMessage {
            offset: offset.clone(),
            payload,
        });

        Ok(offset)
    }

    async fn consume_jobs(
        &self,
        stream_key: &str,
        _group: &str,
        _consumer: &str,
    ) -> Result<BoxStream<'static, JobMessage>, BusError> {
        let queue = self.job_queue(stream_key);

        let stream = futures_util::stream::unfold(queue, |queue| async move {
            loop {
                if let Some(message) = queue.pending.lock().pop_front() {
                    return Some((message, queue));
                }

                queue.notify.notified().await;
            }
        });

        Ok(stream.boxed())
    }

    async fn ack_job(&self, _stream_key: &str, _group: &str, _offset: JobOffset) -> Result<(), BusError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_does_not_error() {
        let bus = InMemoryBus::new();
        bus.publish("room:abc123", b"hello".to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn subscriber_receives_published_payload() {
        let bus = InMemoryBus::new();
        let mut stream = bus.subscribe("room:abc123").await.unwrap();

        bus.publish("room:abc123", b"hello".to_vec()).await.unwrap();

        let received = stream.next().await.unwrap();
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn job_stream_delivers_appended_messages_in_order() {
        let bus = InMemoryBus::new();
        bus.append_job("export-jobs", b"one".to_vec()).await.unwrap();
        bus.append_job("export-jobs", b"two".to_vec()).await.unwrap();

        let mut stream = bus.consume_jobs("export-jobs", "workers", "w1").await.unwrap();

        assert_eq!(stream.next().await.unwrap().payload, b"one");
        assert_eq!(stream.next().await.unwrap().payload, b"two");
    }
}
