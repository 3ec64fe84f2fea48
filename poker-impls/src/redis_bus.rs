use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::{debug, warn};
use poker_core::{BusError, EventBus, JobMessage, JobOffset};
use redis::streams::{StreamAutoClaimOptions, StreamAutoClaimReply, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client};
use tokio_stream::wrappers::ReceiverStream;

/// How long a claimed-but-unacked message may sit idle before another
/// consumer in the group is allowed to reclaim it via `XAUTOCLAIM`.
const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// A Redis-backed [EventBus]: room topics ride Pub/Sub (at-most-once, no
/// replay), the job stream rides Redis Streams with consumer groups (durable,
/// ordered, ack/redeliver).
pub struct RedisBus {
    pool: Pool,
    client: Client,
}

impl RedisBus {
    pub fn new(redis_url: &str) -> Result<Self, BusError> {
        let pool = PoolConfig::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| BusError::Transient(e.to_string()))?;

        let client =
            Client::open(redis_url).map_err(|e| BusError::Transient(e.to_string()))?;

        Ok(Self { pool, client })
    }

    async fn ensure_group(&self, stream_key: &str, group: &str) -> Result<(), BusError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| BusError::Transient(e.to_string()))?;

        let result: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(stream_key, group, "$")
            .await;

        if let Err(e) = result {
            // BUSYGROUP means the group already exists, which is fine.
            if !e.to_string().contains("BUSYGROUP") {
                return Err(BusError::Transient(e.to_string()));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| BusError::Transient(e.to_string()))?;

        conn.publish::<_, _, i64>(topic, payload)
            .await
            .map_err(|e| BusError::Transient(e.to_string()))?;

        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, Vec<u8>>, BusError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::Transient(e.to_string()))?;

        pubsub
            .subscribe(topic)
            .await
            .map_err(|e| BusError::Transient(e.to_string()))?;

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move { msg.get_payload::<Vec<u8>>().ok() })
            .boxed();

        Ok(stream)
    }

    async fn append_job(&self, stream_key: &str, payload: Vec<u8>) -> Result<JobOffset, BusError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| BusError::Transient(e.to_string()))?;

        let id: String = conn
            .xadd(stream_key, "*", &[("payload", payload)])
            .await
            .map_err(|e| BusError::Transient(e.to_string()))?;

        Ok(JobOffset(id))
    }

    async fn consume_jobs(
        &self,
        stream_key: &str,
        group: &str,
        consumer: &str,
    ) -> Result<BoxStream<'static, JobMessage>, BusError> {
        self.ensure_group(stream_key, group).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let pool = self.pool.clone();
        let stream_key = stream_key.to_string();
        let group = group.to_string();
        let consumer = consumer.to_string();

        tokio::spawn(async move {
            let opts = StreamReadOptions::default()
                .group(&group, &consumer)
                .count(16)
                .block(5_000);

            loop {
                let mut conn = match pool.get().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("job consumer could not get a redis connection: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        continue;
                    }
                };

                // Reclaim anything left idle past the visibility timeout
                // (a consumer that died after XREADGROUP but before XACK)
                // before blocking on new entries, so crashed work is
                // redelivered to this consumer instead of sitting in the
                // group's pending entries list forever.
                if let Err(e) = reclaim_stale(&mut conn, &stream_key, &group, &consumer, &tx).await {
                    warn!("job stream reclaim failed: {e}");
                }

                let reply: redis::RedisResult<StreamReadReply> = conn
                    .xread_options(&[&stream_key], &[">"], &opts)
                    .await;

                match reply {
                    Ok(reply) => {
                        for stream in reply.keys {
                            for entry in stream.ids {
                                let payload: Vec<u8> = entry
                                    .map
                                    .get("payload")
                                    .and_then(|v| redis::FromRedisValue::from_redis_value(v).ok())
                                    .unwrap_or_default();

                                let message = JobMessage {
                                    offset: JobOffset(entry.id.clone()),
                                    payload,
                                };

                                if tx.send(message).await.is_err() {
                                    debug!("job consumer receiver dropped, stopping");
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!("job stream read failed: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn ack_job(&self, stream_key: &str, group: &str, offset: JobOffset) -> Result<(), BusError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| BusError::Transient(e.to_string()))?;

        conn.xack::<_, _, _, i64>(stream_key, group, &[offset.0])
            .await
            .map_err(|e| BusError::Transient(e.to_string()))?;

        Ok(())
    }
}

/// Claims every entry in `group`'s pending entries list that has been idle
/// longer than [VISIBILITY_TIMEOUT] and forwards it to `tx` for
/// reprocessing, walking the cursor until Redis reports no more candidates.
async fn reclaim_stale(
    conn: &mut deadpool_redis::Connection,
    stream_key: &str,
    group: &str,
    consumer: &str,
    tx: &tokio::sync::mpsc::Sender<JobMessage>,
) -> redis::RedisResult<()> {
    let mut cursor = "0-0".to_string();

    loop {
        let reply: StreamAutoClaimReply = conn
            .xautoclaim_options(
                stream_key,
                group,
                consumer,
                VISIBILITY_TIMEOUT.as_millis() as u64,
                &cursor,
                StreamAutoClaimOptions::default(),
            )
            .await?;

        let claimed_none = reply.claimed.is_empty();
        cursor = reply.cursor_id;

        for entry in reply.claimed {
            let payload: Vec<u8> = entry
                .map
                .get("payload")
                .and_then(|v| redis::FromRedisValue::from_redis_value(v).ok())
                .unwrap_or_default();

            let message = JobMessage {
                offset: JobOffset(entry.id.clone()),
                payload,
            };

            if tx.send(message).await.is_err() {
                return Ok(());
            }
        }

        if claimed_none || cursor == "0-0" {
            break;
        }
    }

    Ok(())
}
