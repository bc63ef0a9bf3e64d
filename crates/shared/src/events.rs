//! 消息模型与反序列化安全
//!
//! 定义订单管道中流转的两种消息（`OrderCreated` 入站、`OrderDispatched` 出站），
//! 以及基于 `__TypeId__` header 的类型信任校验。JVM 侧的 JSON 序列化器会在
//! header 中携带全限定类型名，消费时只接受受信任命名空间内、且与目标类型同名的类型，
//! 拒绝其他任何类型，避免按 header 动态绑定任意类型。

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;

/// 本服务消息的类型命名空间
pub const MESSAGE_NAMESPACE: &str = "dispatch.message";

/// 携带消息类型全限定名的 header
pub const TYPE_ID_HEADER: &str = "__TypeId__";

/// 带有稳定类型标识的消息
pub trait MessageType {
    /// 全限定类型名，写入出站消息的 `__TypeId__` header
    const TYPE_ID: &'static str;

    /// 不含命名空间的类型名
    fn simple_name() -> &'static str {
        Self::TYPE_ID
            .rsplit_once('.')
            .map(|(_, name)| name)
            .unwrap_or(Self::TYPE_ID)
    }
}

// ---------------------------------------------------------------------------
// 消息定义
// ---------------------------------------------------------------------------

/// 上游订单服务发布的下单事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: Uuid,
    /// 库存键，对本服务不透明
    pub item: String,
}

impl OrderCreated {
    pub fn new(order_id: Uuid, item: impl Into<String>) -> Self {
        Self {
            order_id,
            item: item.into(),
        }
    }
}

impl MessageType for OrderCreated {
    const TYPE_ID: &'static str = "dispatch.message.OrderCreated";
}

/// 发货事件
///
/// `processed_by_id` 为处理该订单的 worker 进程标识，`notes` 是审计用的可读文本。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDispatched {
    pub order_id: Uuid,
    pub processed_by_id: Uuid,
    pub notes: String,
}

impl MessageType for OrderDispatched {
    const TYPE_ID: &'static str = "dispatch.message.OrderDispatched";
}

// ---------------------------------------------------------------------------
// TypeTrust — 类型信任列表
// ---------------------------------------------------------------------------

/// 入站消息类型信任列表
#[derive(Debug, Clone)]
pub struct TypeTrust {
    packages: Vec<String>,
}

impl Default for TypeTrust {
    fn default() -> Self {
        Self::new([MESSAGE_NAMESPACE])
    }
}

impl TypeTrust {
    pub fn new<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            packages: packages.into_iter().map(Into::into).collect(),
        }
    }

    /// 类型名所在包是否受信任
    ///
    /// 条目与包名精确匹配；`*` 信任全部；以 `.*` 结尾的条目信任其下所有子包。
    pub fn is_trusted(&self, type_id: &str) -> bool {
        let Some((package, _)) = type_id.rsplit_once('.') else {
            return false;
        };

        self.packages.iter().any(|trusted| {
            if trusted == "*" {
                return true;
            }
            match trusted.strip_suffix('*') {
                Some(prefix) if prefix.ends_with('.') => package.starts_with(prefix),
                _ => package == trusted,
            }
        })
    }

    /// 校验 header 中声明的类型，未声明时按目标类型处理
    pub fn check<T: MessageType>(
        &self,
        headers: &HashMap<String, String>,
    ) -> Result<(), PipelineError> {
        let Some(type_id) = headers.get(TYPE_ID_HEADER) else {
            return Ok(());
        };

        let simple_name = type_id.rsplit('.').next().unwrap_or(type_id);
        if !self.is_trusted(type_id) || simple_name != T::simple_name() {
            return Err(PipelineError::UntrustedType {
                type_id: type_id.clone(),
            });
        }

        Ok(())
    }

    /// 先校验类型再反序列化 JSON 负载
    pub fn decode<T>(
        &self,
        headers: &HashMap<String, String>,
        payload: &[u8],
    ) -> Result<T, PipelineError>
    where
        T: MessageType + DeserializeOwned,
    {
        self.check::<T>(headers)?;

        serde_json::from_slice(payload).map_err(|e| {
            PipelineError::Serialization(format!("{} 反序列化失败: {e}", T::simple_name()))
        })
    }
}
