//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为业务友好的 Producer/Consumer 抽象，
//! 统一消息序列化、错误映射、offset 提交和优雅关闭语义。
//!
//! 消费端采用"自动提交 + 手动存储 offset"：只有 handler 确认处理完成的消息
//! 才会存储 offset，保证至少一次投递。

use std::collections::HashMap;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::Offset;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::PipelineError;

// ---------------------------------------------------------------------------
// Topic 常量
// ---------------------------------------------------------------------------

/// topic 名称属于跨服务契约，集中定义
pub mod topics {
    pub const ORDER_CREATED: &str = "order.created";
    pub const ORDER_DISPATCHED: &str = "order.dispatched";
    pub const ORDER_CREATED_DLT: &str = "order.created.DLT";
}

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    /// 从 rdkafka 的借用消息构造，提取并拥有所有字段
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = decode_key(msg.key());

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let timestamp = msg.timestamp().to_millis();

        let headers = msg.headers().map(decode_headers).unwrap_or_default();

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp,
            headers,
        }
    }
}

/// 分区键按 UTF-8 有损解码，非法字节替换为 U+FFFD，不会丢失 key
fn decode_key(raw: Option<&[u8]>) -> Option<String> {
    raw.map(|k| String::from_utf8_lossy(k).into_owned())
}

/// 提取值为合法 UTF-8 的消息头，同名消息头以最后一个为准
fn decode_headers<H: Headers>(headers: &H) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|header| {
            let value = std::str::from_utf8(header.value?).ok()?;
            Some((header.key.to_string(), value.to_string()))
        })
        .collect()
}

/// 将 `(名称, 值)` 列表转换为出站消息头，空列表不设置消息头
fn owned_headers(headers: &[(&str, &str)]) -> Option<OwnedHeaders> {
    if headers.is_empty() {
        return None;
    }
    Some(
        headers
            .iter()
            .fold(OwnedHeaders::new(), |acc, (name, value)| {
                acc.insert(Header {
                    key: *name,
                    value: Some(*value),
                })
            }),
    )
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 生产者
///
/// 封装 `FutureProducer` 并提供类型安全的 JSON 发送方法，
/// 内部已派生 Clone（`FutureProducer` 本身是 Arc 包装的）。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl KafkaProducer {
    /// 根据配置创建生产者
    ///
    /// `acks=all` + 幂等生产，`message.timeout.ms` 到期仍未确认的消息以
    /// MessageTimedOut 失败返回，由上层决定重试或进入死信。
    pub fn new(config: &KafkaConfig) -> Result<Self, PipelineError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("message.timeout.ms", config.producer_timeout_ms.to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| PipelineError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.bootstrap_servers, "Kafka 生产者已初始化");
        Ok(Self {
            producer,
            send_timeout: config.producer_timeout(),
        })
    }

    /// 发送原始字节消息并等待 broker 确认
    ///
    /// `key` 为空时不设置分区键；`headers` 原样写入消息头。
    pub async fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
        headers: &[(&str, &str)],
    ) -> Result<(i32, i64), PipelineError> {
        let mut record: FutureRecord<'_, str, [u8]> = FutureRecord::to(topic).payload(payload);
        if let Some(key) = key {
            record = record.key(key);
        }
        if let Some(owned) = owned_headers(headers) {
            record = record.headers(owned);
        }

        // rdkafka 0.39+ 返回 Delivery 结构体而非元组
        let delivery = self
            .producer
            .send(record, self.send_timeout)
            .await
            .map_err(|(e, _)| PipelineError::from_produce(&e))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }

    /// 将值序列化为 JSON 后发送
    ///
    /// 序列化与网络发送拆分为两步，便于独立定位故障原因。
    pub async fn send_json<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
        headers: &[(&str, &str)],
    ) -> Result<(i32, i64), PipelineError> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| PipelineError::Serialization(format!("序列化失败: {e}")))?;

        self.send(topic, Some(key), &payload, headers).await
    }

    /// 阻塞等待所有在途消息投递完成
    pub fn flush(&self, timeout: Duration) -> Result<(), PipelineError> {
        self.producer
            .flush(timeout)
            .map_err(|e| PipelineError::Kafka(format!("flush 生产者失败: {e}")))
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// handler 结束后对该分区位置的处理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetAction {
    /// 消息已落地，存储下一条待消费的位置
    Store { next: i64 },
    /// 消息未落地，回退到该消息重新拉取
    Rewind { offset: i64 },
}

/// 根据 handler 结果决定存储还是回退，存储的位置总是已处理 offset + 1
pub fn offset_action<E>(result: &Result<(), E>, offset: i64) -> OffsetAction {
    match result {
        Ok(()) => OffsetAction::Store { next: offset + 1 },
        Err(_) => OffsetAction::Rewind { offset },
    }
}

/// 面向业务的 Kafka 消费者
///
/// 封装 `StreamConsumer` 并提供基于 `watch` channel 的优雅关闭语义，
/// 确保进程退出时不会丢失正在处理的消息。
pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl KafkaConsumer {
    /// 创建消费者
    ///
    /// `client_suffix` 用于区分同一消费组内的多个实例，便于在 broker 侧排查。
    pub fn new(config: &KafkaConfig, client_suffix: Option<&str>) -> Result<Self, PipelineError> {
        let client_id = match client_suffix {
            Some(suffix) => format!("{}-{}", config.consumer_group, suffix),
            None => config.consumer_group.clone(),
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.consumer_group)
            .set("client.id", &client_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .create()
            .map_err(|e| PipelineError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(
            brokers = %config.bootstrap_servers,
            group_id = %config.consumer_group,
            client_id,
            "Kafka 消费者已初始化"
        );
        Ok(Self { consumer })
    }

    /// 订阅指定的 topic 列表
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), PipelineError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| PipelineError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    /// 启动消费循环
    ///
    /// 使用 `tokio::select!` 同时监听消息流和关闭信号：
    /// - 消息逐条交给 handler 处理，handler 完成前不会拉取下一条，分区内严格有序。
    /// - handler 返回 `Ok` 后存储该消息的 offset；返回 `Err` 表示消息尚未落地，
    ///   回退到该 offset 让 broker 重新投递，不会越过它。
    /// - 关闭信号变为 `true` 时退出循环，正在执行的 handler 会先自然完成，
    ///   退出前同步提交已存储的 offset。
    pub async fn start<F, Fut>(self, mut shutdown: watch::Receiver<bool>, handler: F)
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: std::future::Future<Output = Result<(), PipelineError>>,
    {
        use futures::StreamExt;

        let stream = self.consumer.stream();
        futures::pin_mut!(stream);

        info!("Kafka 消费循环已启动");

        loop {
            tokio::select! {
                // 偏向关闭信号，保证收到关闭时能尽快退出
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("收到关闭信号，Kafka 消费循环退出");
                        break;
                    }
                }

                msg_result = stream.next() => {
                    let Some(msg_result) = msg_result else {
                        warn!("Kafka 消息流意外结束");
                        break;
                    };

                    // BorrowedMessage 不可跨 await 持有，先转换为拥有所有权的消息
                    let msg = match msg_result {
                        Ok(borrowed_msg) => ConsumerMessage::from_borrowed(&borrowed_msg),
                        Err(e) => {
                            error!(error = %e, "接收 Kafka 消息出错");
                            continue;
                        }
                    };

                    debug!(
                        topic = %msg.topic,
                        partition = msg.partition,
                        offset = msg.offset,
                        "收到 Kafka 消息"
                    );

                    let topic = msg.topic.clone();
                    let (partition, offset) = (msg.partition, msg.offset);

                    let result = handler(msg).await;
                    if let Err(e) = &result {
                        error!(
                            error = %e,
                            topic = %topic,
                            partition,
                            offset,
                            "消息未能落地，回退 offset 等待重新投递"
                        );
                    }

                    match offset_action(&result, offset) {
                        OffsetAction::Store { next } => {
                            self.store_position(&topic, partition, next)
                        }
                        OffsetAction::Rewind { offset } => self.rewind(&topic, partition, offset),
                    }
                }
            }
        }

        if let Err(e) = self.consumer.commit_consumer_state(CommitMode::Sync) {
            // 没有新存储的 offset 时 librdkafka 同样返回错误
            debug!(error = %e, "关闭前提交 offset 未完成");
        }
    }

    /// 存储下一条待消费的位置，随下一次自动提交生效
    fn store_position(&self, topic: &str, partition: i32, next: i64) {
        if let Err(e) = self.consumer.store_offset(topic, partition, next) {
            error!(error = %e, topic, partition, next, "存储 offset 失败");
        }
    }

    /// 将分区位置回退到指定消息，使其被重新拉取
    ///
    /// 零超时使 seek 异步执行，不阻塞 tokio 工作线程。
    fn rewind(&self, topic: &str, partition: i32, offset: i64) {
        if let Err(e) = self
            .consumer
            .seek(topic, partition, Offset::Offset(offset), Duration::ZERO)
        {
            error!(
                error = %e,
                topic,
                partition,
                offset,
                "回退 offset 失败，消息将在再均衡或重启后重新投递"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
