//! 订单发货服务
//!
//! 消费 `order.created` 事件，通过 HTTP 向库存服务确认商品可用性，
//! 可用时以相同分区键发布 `order.dispatched` 事件。
//! 瞬时故障原地退避重试，永久故障或重试耗尽的记录转入 `order.created.DLT`。

pub mod consumer;
pub mod error;
pub mod processor;
pub mod publisher;
pub mod stock_client;
