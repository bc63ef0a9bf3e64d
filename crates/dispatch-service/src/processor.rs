//! 单条订单的处理流程
//!
//! 查询库存 -> 解析可用性 -> 构造发货事件 -> 以相同分区键发布。
//! 处理器不做任何错误分类，库存客户端和发布器的错误原样上抛。

use std::fmt;
use std::sync::Arc;

use pipeline_shared::events::{OrderCreated, OrderDispatched};
use pipeline_shared::kafka::topics;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::publisher::Publisher;
use crate::stock_client::{StockService, parse_availability};

/// 工作进程标识
///
/// 进程启动时生成一次，之后只读，写入每条发货事件的 `processedById`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(Uuid);

impl WorkerId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for WorkerId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 一次成功处理的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 已发布发货事件
    Dispatched,
    /// 商品不可用，未发布任何事件
    Unavailable,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dispatched => "dispatched",
            Self::Unavailable => "unavailable",
        }
    }
}

/// 审计用的发货备注，保持 `Dispatched` 与商品键直接拼接的线上格式
pub fn dispatch_notes(item: &str) -> String {
    format!("Dispatched{item}")
}

/// 订单发货处理器
pub struct DispatchProcessor {
    stock: Arc<dyn StockService>,
    publisher: Arc<dyn Publisher>,
    worker_id: WorkerId,
    strict_availability: bool,
}

impl DispatchProcessor {
    pub fn new(
        stock: Arc<dyn StockService>,
        publisher: Arc<dyn Publisher>,
        worker_id: WorkerId,
    ) -> Self {
        Self {
            stock,
            publisher,
            worker_id,
            strict_availability: false,
        }
    }

    /// 严格模式下，库存服务返回 `true` / `false` 以外的内容视为不可重试错误
    pub fn with_strict_availability(mut self, strict: bool) -> Self {
        self.strict_availability = strict;
        self
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// 处理一条下单事件
    pub async fn process(
        &self,
        key: &str,
        event: &OrderCreated,
    ) -> Result<DispatchOutcome, DispatchError> {
        let body = self.stock.check_availability(&event.item).await?;

        if !parse_availability(&body, self.strict_availability)? {
            warn!(
                order_id = %event.order_id,
                item = %event.item,
                "商品不可用，跳过发货"
            );
            return Ok(DispatchOutcome::Unavailable);
        }

        let dispatched = OrderDispatched {
            order_id: event.order_id,
            processed_by_id: self.worker_id.as_uuid(),
            notes: dispatch_notes(&event.item),
        };

        self.publisher
            .publish(topics::ORDER_DISPATCHED, key, &dispatched)
            .await?;

        info!(
            order_id = %dispatched.order_id,
            key,
            processed_by = %self.worker_id,
            "发货事件已发布"
        );
        Ok(DispatchOutcome::Dispatched)
    }
}
