//! A [`EventBus`] backed by Redis Streams (`XADD`/`XGROUP`/`XREADGROUP`/`XACK`),
//! the production backend.

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

use crate::{BusConfig, BusError, ConsumeOptions, Consumer, Delivery, EventBus};

const FIELD_SUBJECT: &str = "subject";
const FIELD_PAYLOAD: &str = "payload";

/// A production event bus over Redis Streams.
///
/// One stream per top-level subject family (`TELEMETRY`, `ALERTS`, `ROUTES`,
/// ...); `subscribe` maps a subject pattern to the stream it belongs to and
/// reads via a consumer group. Redelivery counts are tracked in a side hash
/// keyed by stream entry id (`<stream>:<group>:deliveries`), incremented on
/// every read and cleared on ack, since the redis crate's `XPENDING`
/// bindings don't expose the per-entry delivery counter directly.
#[derive(Clone)]
pub struct RedisStreamsEventBus {
    pool: Pool,
}

impl RedisStreamsEventBus {
    /// Build a bus from `config`, creating a connection pool but not
    /// connecting eagerly.
    pub fn new(config: &BusConfig) -> Result<Self, BusError> {
        let pool = PoolConfig::from_url(&config.redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| BusError::Backend(e.to_string()))?;
        Ok(Self { pool })
    }

    fn stream_for_subject(subject: &str) -> &'static str {
        match subject.split('.').next() {
            Some("telemetry") => crate::TELEMETRY_STREAM,
            Some("alerts") => crate::ALERTS_STREAM,
            Some("routes") => crate::ROUTES_STREAM,
            _ => crate::TELEMETRY_STREAM,
        }
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BusError> {
        let mut conn = self.pool.get().await.map_err(|e| BusError::Backend(e.to_string()))?;
        let created: redis::RedisResult<()> = conn.xgroup_create_mkstream(stream, group, "$").await;
        match created {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(BusError::Backend(e.to_string())),
        }
    }
}

#[async_trait]
impl EventBus for RedisStreamsEventBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        let stream = Self::stream_for_subject(subject);
        let mut conn = self.pool.get().await.map_err(|e| BusError::Backend(e.to_string()))?;
        let payload_vec = payload.to_vec();
        let _: String = conn
            .xadd(
                stream,
                "*",
                &[(FIELD_SUBJECT, subject.as_bytes()), (FIELD_PAYLOAD, payload_vec.as_slice())],
            )
            .await
            .map_err(|e| BusError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(
        &self,
        subject_pattern: &str,
        consumer_group: &str,
        opts: ConsumeOptions,
    ) -> Result<Box<dyn Consumer>, BusError> {
        let stream = Self::stream_for_subject(subject_pattern).to_owned();
        self.ensure_group(&stream, consumer_group).await?;
        let deliveries_key = format!("{stream}:{consumer_group}:deliveries");
        Ok(Box::new(RedisConsumer {
            pool: self.pool.clone(),
            stream,
            pattern: subject_pattern.to_owned(),
            group: consumer_group.to_owned(),
            consumer_name: format!("{consumer_group}-{}", uuid::Uuid::new_v4()),
            deliveries_key,
            opts,
        }))
    }

    async fn ping(&self) -> Result<(), BusError> {
        let mut conn = self.pool.get().await.map_err(|e| BusError::Backend(e.to_string()))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| BusError::Backend(e.to_string()))?;
        Ok(())
    }
}

struct RedisConsumer {
    pool: Pool,
    stream: String,
    pattern: String,
    group: String,
    consumer_name: String,
    deliveries_key: String,
    opts: ConsumeOptions,
}

#[async_trait]
impl Consumer for RedisConsumer {
    async fn next(&mut self) -> Result<Option<Delivery>, BusError> {
        loop {
            let mut conn = self.pool.get().await.map_err(|e| BusError::Backend(e.to_string()))?;

            let read_opts = StreamReadOptions::default()
                .group(&self.group, &self.consumer_name)
                .count(1)
                .block(5000);

            let reply: StreamReadReply = conn
                .xread_options(&[self.stream.as_str()], &[">"], &read_opts)
                .await
                .map_err(|e| BusError::Backend(e.to_string()))?;

            for stream_key in reply.keys {
                for id in stream_key.ids {
                    let subject = id
                        .map
                        .get(FIELD_SUBJECT)
                        .and_then(|v| match v {
                            redis::Value::Data(bytes) => String::from_utf8(bytes.clone()).ok(),
                            _ => None,
                        })
                        .unwrap_or_default();

                    if !crate::subject::matches(&self.pattern, &subject) {
                        let _: redis::RedisResult<()> =
                            conn.xack(&self.stream, &self.group, &[&id.id]).await;
                        continue;
                    }

                    let payload: Vec<u8> = id
                        .map
                        .get(FIELD_PAYLOAD)
                        .and_then(|v| match v {
                            redis::Value::Data(bytes) => Some(bytes.clone()),
                            _ => None,
                        })
                        .unwrap_or_default();

                    let delivery_count: u32 = conn
                        .hincr(&self.deliveries_key, &id.id, 1)
                        .await
                        .map_err(|e| BusError::Backend(e.to_string()))?;

                    if delivery_count > self.opts.max_deliver {
                        tracing::warn!(
                            stream = %self.stream,
                            consumer_group = %self.group,
                            entry_id = %id.id,
                            "dropping message past max_deliver"
                        );
                        let _: redis::RedisResult<()> =
                            conn.xack(&self.stream, &self.group, &[&id.id]).await;
                        let _: redis::RedisResult<()> =
                            conn.hdel(&self.deliveries_key, &id.id).await;
                        continue;
                    }

                    let ack_pool = self.pool.clone();
                    let ack_stream = self.stream.clone();
                    let ack_group = self.group.clone();
                    let ack_deliveries_key = self.deliveries_key.clone();
                    let entry_id = id.id.clone();

                    let ack = move |acked: bool| {
                        if !acked {
                            return;
                        }
                        tokio::spawn(async move {
                            if let Ok(mut conn) = ack_pool.get().await {
                                let _: redis::RedisResult<()> =
                                    conn.xack(&ack_stream, &ack_group, &[&entry_id]).await;
                                let _: redis::RedisResult<()> =
                                    conn.hdel(&ack_deliveries_key, &entry_id).await;
                            }
                        });
                    };

                    return Ok(Some(Delivery::new(subject, Bytes::from(payload), delivery_count, ack)));
                }
            }
        }
    }
}

#[cfg(all(test, feature = "integration"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_consume_round_trip() {
        let config = BusConfig::from_env();
        let bus = RedisStreamsEventBus::new(&config).unwrap();
        let mut consumer = bus
            .subscribe("telemetry.*.*", "ingest-workers-test", ConsumeOptions::default())
            .await
            .unwrap();

        bus.publish("telemetry.t1.d1", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let delivery = consumer.next().await.unwrap().unwrap();
        assert_eq!(delivery.subject, "telemetry.t1.d1");
        delivery.ack();
    }
}
