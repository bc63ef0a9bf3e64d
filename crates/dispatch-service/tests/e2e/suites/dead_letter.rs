//! 死信链路
//!
//! 死信记录保留原始 key 与原始负载字节，失败原因写在 `dlt-*` 消息头中。

use std::time::Duration;

use pipeline_shared::dlq::headers;
use pipeline_shared::events::OrderCreated;
use uuid::Uuid;

use crate::helpers::*;
use crate::setup::TestEnvironment;

#[cfg(test)]
mod dead_letter_tests {
    use super::*;

    /// 库存服务 400：不重试，直接进入死信
    #[tokio::test]
    #[ignore = "需要运行 Kafka"]
    async fn test_client_error_goes_to_dead_letter_without_retry() {
        let env = TestEnvironment::setup(StockStub::new().always("bad-item", 400, "Bad Request"))
            .await
            .unwrap();

        let key = env.unique_key();
        let order = OrderCreated::new(Uuid::new_v4(), "bad-item");
        let payload = serde_json::to_vec(&order).unwrap();
        env.kafka.send_order(&key, &order).await.unwrap();

        let dead = env
            .kafka
            .dead_letters_for(&key, 1, Duration::from_secs(15))
            .await
            .unwrap();
        assert_eq!(dead.len(), 1, "应该写入一条死信");

        let record = &dead[0];
        assert_eq!(record.key.as_deref(), Some(key.as_str()));
        assert_eq!(record.payload, payload, "死信负载应与原始字节一致");
        assert_eq!(record.headers[headers::ORIGINAL_TOPIC], "order.created");
        assert_eq!(record.headers[headers::EXCEPTION_KIND], "non-retryable");
        assert!(record.headers[headers::EXCEPTION_MESSAGE].contains("400"));

        assert_eq!(env.stock.call_count("bad-item"), 1, "永久失败不应重试");
        let dispatched = env
            .kafka
            .dispatched_for(&key, 1, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(dispatched.is_empty());

        env.shutdown().await.unwrap();
    }

    /// 库存服务持续 503：首次 + 2 次重试后进入死信
    #[tokio::test]
    #[ignore = "需要运行 Kafka"]
    async fn test_retries_exhausted_goes_to_dead_letter() {
        let env = TestEnvironment::setup(
            StockStub::new().always("flaky-item", 503, "Service Unavailable"),
        )
        .await
        .unwrap();

        let key = env.unique_key();
        let order = OrderCreated::new(Uuid::new_v4(), "flaky-item");
        env.kafka.send_order(&key, &order).await.unwrap();

        let dead = env
            .kafka
            .dead_letters_for(&key, 1, Duration::from_secs(15))
            .await
            .unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].headers[headers::EXCEPTION_KIND], "retryable-exhausted");
        assert_eq!(
            env.stock.call_count("flaky-item"),
            env.config.retry.max_retries as usize + 1
        );

        env.shutdown().await.unwrap();
    }

    /// 不受信任的类型声明在调用库存服务前被拒绝
    #[tokio::test]
    #[ignore = "需要运行 Kafka"]
    async fn test_untrusted_type_goes_to_dead_letter() {
        let env = TestEnvironment::setup(StockStub::new()).await.unwrap();

        let key = env.unique_key();
        let payload = serde_json::to_vec(&OrderCreated::new(Uuid::new_v4(), "gadget")).unwrap();
        env.kafka
            .send_raw(&key, &payload, Some("dispatch.message.evil.OrderCreated"))
            .await
            .unwrap();

        let dead = env
            .kafka
            .dead_letters_for(&key, 1, Duration::from_secs(15))
            .await
            .unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].payload, payload);
        assert_eq!(env.stock.call_count("gadget"), 0);

        env.shutdown().await.unwrap();
    }
}
