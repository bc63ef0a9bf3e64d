//! 死信 topic 投递
//!
//! 当消息处理遇到永久性错误，或瞬时错误重试耗尽后，原始消息被转发到 `<topic>.DLT`。
//! 死信记录保留原始 key 与原始负载字节（不做任何包装），便于之后原样回放；
//! 失败原因、来源分区和 offset 等诊断信息放在消息头中。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, warn};

use crate::error::PipelineError;
use crate::kafka::{ConsumerMessage, KafkaProducer};
use crate::retry::{RetryPolicy, retry_with_policy};

/// 死信消息头名称
pub mod headers {
    pub const ORIGINAL_TOPIC: &str = "dlt-original-topic";
    pub const ORIGINAL_PARTITION: &str = "dlt-original-partition";
    pub const ORIGINAL_OFFSET: &str = "dlt-original-offset";
    pub const EXCEPTION_KIND: &str = "dlt-exception-kind";
    pub const EXCEPTION_MESSAGE: &str = "dlt-exception-message";
    pub const FAILED_AT: &str = "dlt-failed-at";
}

/// 源 topic 对应的死信 topic
pub fn dlt_topic_for(source_topic: &str) -> String {
    format!("{source_topic}.DLT")
}

// ---------------------------------------------------------------------------
// DeadLetterRecord — 死信记录
// ---------------------------------------------------------------------------

/// 进入死信的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// 瞬时错误，重试预算已耗尽
    RetriesExhausted,
    /// 永久性错误，未经退避直接进入死信
    NonRetryable,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetriesExhausted => "retryable-exhausted",
            Self::NonRetryable => "non-retryable",
        }
    }
}

impl std::fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条待写入死信 topic 的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterRecord {
    pub source_topic: String,
    pub partition: i32,
    pub offset: i64,
    /// 原始分区键，死信记录使用相同的 key
    pub key: Option<String>,
    /// 原始负载字节
    pub payload: Vec<u8>,
    pub reason: DeadLetterReason,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn from_message(
        msg: &ConsumerMessage,
        reason: DeadLetterReason,
        error: impl Into<String>,
    ) -> Self {
        Self {
            source_topic: msg.topic.clone(),
            partition: msg.partition,
            offset: msg.offset,
            key: msg.key.clone(),
            payload: msg.payload.clone(),
            reason,
            error: error.into(),
            failed_at: Utc::now(),
        }
    }

    pub fn dlt_topic(&self) -> String {
        dlt_topic_for(&self.source_topic)
    }

    /// 诊断信息消息头
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            (headers::ORIGINAL_TOPIC, self.source_topic.clone()),
            (headers::ORIGINAL_PARTITION, self.partition.to_string()),
            (headers::ORIGINAL_OFFSET, self.offset.to_string()),
            (headers::EXCEPTION_KIND, self.reason.as_str().to_string()),
            (headers::EXCEPTION_MESSAGE, self.error.clone()),
            (headers::FAILED_AT, self.failed_at.to_rfc3339()),
        ]
    }
}

// ---------------------------------------------------------------------------
// DeadLetterSink — 死信投递抽象
// ---------------------------------------------------------------------------

/// 死信投递接口，返回 `Ok` 表示 broker 已确认写入
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn publish(&self, record: &DeadLetterRecord) -> Result<(), PipelineError>;
}

/// 基于 Kafka 的死信投递
///
/// 死信写入本身遇到 broker 瞬时故障时按退避策略重试；
/// 仍然失败则返回错误，由消费循环回退 offset，保证消息不丢。
pub struct DeadLetterPublisher {
    producer: KafkaProducer,
    retry_policy: RetryPolicy,
}

impl DeadLetterPublisher {
    pub fn new(producer: KafkaProducer, retry_policy: RetryPolicy) -> Self {
        Self {
            producer,
            retry_policy,
        }
    }
}

#[async_trait]
impl DeadLetterSink for DeadLetterPublisher {
    async fn publish(&self, record: &DeadLetterRecord) -> Result<(), PipelineError> {
        let topic = record.dlt_topic();
        let header_values = record.headers();
        let header_refs = borrow_headers(&header_values);

        let result = retry_with_policy(
            &self.retry_policy,
            "dead_letter_publish",
            PipelineError::is_retryable,
            || {
                self.producer
                    .send(&topic, record.key.as_deref(), &record.payload, &header_refs)
            },
        )
        .await;

        match result {
            Ok(_) => {
                warn!(
                    dlt_topic = %topic,
                    key = ?record.key,
                    source_partition = record.partition,
                    source_offset = record.offset,
                    reason = %record.reason,
                    error = %record.error,
                    "消息已发送到死信 topic"
                );
                let reason = record.reason.as_str();
                metrics::counter!("dispatch_dead_lettered_total", "reason" => reason).increment(1);
                Ok(())
            }
            Err(e) => {
                error!(
                    dlt_topic = %topic,
                    key = ?record.key,
                    source_partition = record.partition,
                    source_offset = record.offset,
                    error = %e,
                    "发送到死信 topic 失败"
                );
                Err(e)
            }
        }
    }
}

/// 转换为生产者接受的借用形式，顺序不变
fn borrow_headers<'a>(values: &'a [(&'static str, String)]) -> Vec<(&'static str, &'a str)> {
    values
        .iter()
        .map(|(name, value)| (*name, value.as_str()))
        .collect()
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
