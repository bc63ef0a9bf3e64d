//! 统一错误处理模块
//!
//! 定义管道基础设施层共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 业务服务在此基础上定义自己的错误分类，并通过 `#[from]` 透传本类型。

use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum PipelineError {
    // ==================== Kafka 错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    /// 生产者投递失败；`transient` 标记 broker 侧的瞬时故障
    #[error("消息发送失败: {message}")]
    Produce { message: String, transient: bool },

    // ==================== 序列化错误 ====================
    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("不受信任的消息类型: {type_id}")]
    UntrustedType { type_id: String },
}

impl PipelineError {
    /// 将 rdkafka 的投递错误转换为 Produce 变体，并判断是否为瞬时故障
    pub fn from_produce(err: &KafkaError) -> Self {
        let transient = match err.rdkafka_error_code() {
            Some(code) => is_transient_code(code),
            None => false,
        };
        Self::Produce {
            message: err.to_string(),
            transient,
        }
    }

    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Produce { transient: true, .. })
    }
}

/// broker 侧可恢复的错误码：超时、队列满、leader 切换、网络抖动
fn is_transient_code(code: RDKafkaErrorCode) -> bool {
    matches!(
        code,
        RDKafkaErrorCode::MessageTimedOut
            | RDKafkaErrorCode::QueueFull
            | RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::LeaderNotAvailable
            | RDKafkaErrorCode::NotLeaderForPartition
            | RDKafkaErrorCode::RequestTimedOut
            | RDKafkaErrorCode::NetworkException
            | RDKafkaErrorCode::NotEnoughReplicas
            | RDKafkaErrorCode::NotEnoughReplicasAfterAppend
    )
}
