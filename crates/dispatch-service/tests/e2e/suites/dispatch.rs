//! 正常发货链路

use std::time::Duration;

use pipeline_shared::events::{OrderCreated, TYPE_ID_HEADER};
use uuid::Uuid;

use crate::helpers::*;
use crate::setup::TestEnvironment;

#[cfg(test)]
mod dispatch_tests {
    use super::*;

    /// 商品可用时以相同 key 发布发货事件
    #[tokio::test]
    #[ignore = "需要运行 Kafka"]
    async fn test_available_item_is_dispatched_with_same_key() {
        let env = TestEnvironment::setup(StockStub::new().always("my-item", 200, "true"))
            .await
            .unwrap();

        let key = env.unique_key();
        let order = OrderCreated::new(Uuid::new_v4(), "my-item");
        env.kafka.send_order(&key, &order).await.unwrap();

        let dispatched = env
            .kafka
            .dispatched_for(&key, 1, Duration::from_secs(15))
            .await
            .unwrap();
        assert_eq!(dispatched.len(), 1, "应该发布一条发货事件");

        let record = &dispatched[0];
        assert_eq!(record.key.as_deref(), Some(key.as_str()));
        assert_eq!(
            record.headers.get(TYPE_ID_HEADER).map(String::as_str),
            Some("dispatch.message.OrderDispatched")
        );

        let json = record.json();
        assert_eq!(json["orderId"], order.order_id.to_string());
        assert_eq!(json["processedById"], env.worker_id.to_string());
        assert_eq!(json["notes"], "Dispatchedmy-item");

        assert_eq!(env.stock.call_count("my-item"), 1);
        let dead = env
            .kafka
            .dead_letters_for(&key, 1, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(dead.is_empty(), "成功的记录不应进入死信");

        env.shutdown().await.unwrap();
    }

    /// 商品不可用时不发布任何事件
    #[tokio::test]
    #[ignore = "需要运行 Kafka"]
    async fn test_unavailable_item_publishes_nothing() {
        let env = TestEnvironment::setup(StockStub::new().always("sold-out", 200, "false"))
            .await
            .unwrap();

        let key = env.unique_key();
        let order = OrderCreated::new(Uuid::new_v4(), "sold-out");
        env.kafka.send_order(&key, &order).await.unwrap();

        // 同 key 的后续记录被处理，说明前一条已经完成
        let marker = OrderCreated::new(Uuid::new_v4(), "in-stock");
        env.kafka.send_order(&key, &marker).await.unwrap();

        let dispatched = env
            .kafka
            .dispatched_for(&key, 2, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].json()["orderId"], marker.order_id.to_string());
        assert_eq!(env.stock.call_count("sold-out"), 1);

        env.shutdown().await.unwrap();
    }
}
