//! 发货服务端到端测试
//!
//! 在进程内启动真实的消费绑定，连接 `KAFKA_BROKERS` 指定的 broker，
//! 库存服务由本地 HTTP 桩代替。覆盖：
//! - 正常发货（同 key 发布 + `__TypeId__` 消息头）
//! - 永久失败进入死信
//! - 重试耗尽进入死信
//! - 同一分区内的顺序，包括前一条记录重试期间
//!
//! 所有用例共用固定 topic，必须串行执行，`TestEnvironment` 内部持有全局锁。

pub mod helpers;
pub mod suites;

pub use setup::TestEnvironment;
