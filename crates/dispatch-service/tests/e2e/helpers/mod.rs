//! 测试辅助工具模块
//!
//! 提供 Kafka 收发工具与库存服务桩。

mod kafka_helper;
mod stock_stub;

pub use kafka_helper::*;
pub use stock_stub::*;
