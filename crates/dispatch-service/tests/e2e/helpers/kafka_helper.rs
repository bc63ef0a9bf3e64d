//! Kafka 辅助工具
//!
//! 向 `order.created` 发送下单事件，并按 key 收集出站与死信记录。

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use pipeline_shared::events::{MessageType, OrderCreated, TYPE_ID_HEADER};
use pipeline_shared::kafka::topics;
use rdkafka::Message;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use uuid::Uuid;

/// 从 broker 读回的一条记录
#[derive(Debug, Clone)]
pub struct ObservedRecord {
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub partition: i32,
    pub offset: i64,
}

impl ObservedRecord {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

pub struct KafkaHelper {
    producer: FutureProducer,
    brokers: String,
}

impl KafkaHelper {
    pub fn new(brokers: &str) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            brokers: brokers.to_string(),
        })
    }

    // ========== 事件发送 ==========

    /// 发送下单事件，带 JVM 生产者同样会写入的 `__TypeId__` 消息头
    pub async fn send_order(&self, key: &str, order: &OrderCreated) -> Result<()> {
        let payload = serde_json::to_vec(order)?;
        self.send_raw(key, &payload, Some(OrderCreated::TYPE_ID)).await
    }

    pub async fn send_raw(&self, key: &str, payload: &[u8], type_id: Option<&str>) -> Result<()> {
        let mut record = FutureRecord::to(topics::ORDER_CREATED)
            .key(key)
            .payload(payload);
        if let Some(type_id) = type_id {
            record = record.headers(OwnedHeaders::new().insert(Header {
                key: TYPE_ID_HEADER,
                value: Some(type_id),
            }));
        }

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("发送消息失败: {}", e))?;
        Ok(())
    }

    // ========== 记录收集 ==========

    /// 收集 `order.dispatched` 上指定 key 的记录
    pub async fn dispatched_for(
        &self,
        key: &str,
        expected: usize,
        timeout: Duration,
    ) -> Result<Vec<ObservedRecord>> {
        self.collect(topics::ORDER_DISPATCHED, key, expected, timeout).await
    }

    /// 收集 `order.created.DLT` 上指定 key 的记录
    pub async fn dead_letters_for(
        &self,
        key: &str,
        expected: usize,
        timeout: Duration,
    ) -> Result<Vec<ObservedRecord>> {
        self.collect(topics::ORDER_CREATED_DLT, key, expected, timeout).await
    }

    /// 从 topic 开头读取，按 key 过滤，收齐 `expected` 条或超时后返回
    async fn collect(
        &self,
        topic: &str,
        key: &str,
        expected: usize,
        timeout: Duration,
    ) -> Result<Vec<ObservedRecord>> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", format!("e2e-observer-{}", Uuid::new_v4()))
            .set("enable.partition.eof", "false")
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;
        consumer.subscribe(&[topic])?;

        let mut records = Vec::new();
        let mut stream = consumer.stream();
        let deadline = tokio::time::Instant::now() + timeout;

        while records.len() < expected {
            tokio::select! {
                msg = stream.next() => {
                    let Some(Ok(m)) = msg else { break };
                    let record_key = m.key().map(|k| String::from_utf8_lossy(k).into_owned());
                    if record_key.as_deref() != Some(key) {
                        continue;
                    }
                    let headers: HashMap<String, String> = m
                        .headers()
                        .map(|h| {
                            h.iter()
                                .filter_map(|header| {
                                    let value = std::str::from_utf8(header.value?).ok()?;
                                    Some((header.key.to_string(), value.to_string()))
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                    records.push(ObservedRecord {
                        key: record_key,
                        payload: m.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                        headers,
                        partition: m.partition(),
                        offset: m.offset(),
                    });
                }
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        Ok(records)
    }
}
