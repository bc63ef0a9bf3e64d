//! 共享库
//!
//! 包含订单管道各服务共用的配置、错误处理、消息模型、Kafka、重试与死信等基础设施代码。

pub mod config;
pub mod dlq;
pub mod error;
pub mod events;
pub mod kafka;
pub mod observability;
pub mod retry;
