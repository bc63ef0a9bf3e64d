//! 出站事件发布
//!
//! 以入站记录的分区键发布 `OrderDispatched`，并等待 broker 确认后才返回，
//! 使 offset 的推进永远不会超过下游投递。发布失败原样上抛，由调用方分类。

use async_trait::async_trait;
use pipeline_shared::events::{MessageType, OrderDispatched, TYPE_ID_HEADER};
use pipeline_shared::kafka::KafkaProducer;
use tracing::debug;

use crate::error::DispatchError;

/// 出站事件发布接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    /// 发布事件，`Ok` 表示 broker 已确认写入
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        value: &OrderDispatched,
    ) -> Result<(), DispatchError>;
}

/// 基于 Kafka 的发布实现
///
/// 出站记录携带 `__TypeId__` 消息头，JVM 侧的 JSON 反序列化器依此绑定类型。
#[derive(Clone)]
pub struct KafkaPublisher {
    producer: KafkaProducer,
}

impl KafkaPublisher {
    pub fn new(producer: KafkaProducer) -> Self {
        Self { producer }
    }
}

/// 发货事件的出站消息头
pub fn dispatched_headers() -> [(&'static str, &'static str); 1] {
    [(TYPE_ID_HEADER, OrderDispatched::TYPE_ID)]
}

#[async_trait]
impl Publisher for KafkaPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        value: &OrderDispatched,
    ) -> Result<(), DispatchError> {
        let (partition, offset) = self
            .producer
            .send_json(topic, key, value, &dispatched_headers())
            .await?;

        debug!(
            topic,
            key,
            order_id = %value.order_id,
            partition,
            offset,
            "发货事件已确认写入"
        );
        Ok(())
    }
}
