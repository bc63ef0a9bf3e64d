//! 分区内顺序
//!
//! 同一 key 的记录落在同一分区，前一条记录重试期间后续记录不会被处理。

use std::time::Duration;

use pipeline_shared::events::OrderCreated;
use uuid::Uuid;

use crate::helpers::*;
use crate::setup::TestEnvironment;

#[cfg(test)]
mod ordering_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "需要运行 Kafka"]
    async fn test_same_key_records_are_dispatched_in_order() {
        // 第一条记录先遇到一次瞬时故障
        let stock = StockStub::new().then("item-a", &[(503, "Service Unavailable")]);
        let env = TestEnvironment::setup(stock).await.unwrap();

        let key = env.unique_key();
        let orders: Vec<_> = ["item-a", "item-b", "item-c"]
            .into_iter()
            .map(|item| OrderCreated::new(Uuid::new_v4(), item))
            .collect();
        for order in &orders {
            env.kafka.send_order(&key, order).await.unwrap();
        }

        let dispatched = env
            .kafka
            .dispatched_for(&key, 3, Duration::from_secs(20))
            .await
            .unwrap();
        assert_eq!(dispatched.len(), 3);

        let order_ids: Vec<_> = dispatched
            .iter()
            .map(|r| r.json()["orderId"].as_str().unwrap_or_default().to_string())
            .collect();
        let expected: Vec<_> = orders.iter().map(|o| o.order_id.to_string()).collect();
        assert_eq!(order_ids, expected, "发货事件应保持入站顺序");

        // 出站记录同样位于同一分区，offset 递增
        assert!(dispatched.iter().all(|r| r.partition == dispatched[0].partition));
        assert!(dispatched.windows(2).all(|w| w[0].offset < w[1].offset));

        // 重试发生在原地，item-b 只会在 item-a 成功之后被查询
        assert_eq!(
            env.stock.calls_for(&["item-a", "item-b", "item-c"]),
            vec!["item-a", "item-a", "item-b", "item-c"]
        );

        env.shutdown().await.unwrap();
    }
}
