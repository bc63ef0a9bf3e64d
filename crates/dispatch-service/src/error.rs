//! 发货服务错误分类
//!
//! 所有失败只分两类：可重试（瞬时故障，原地重试同一条记录）与
//! 不可重试（永久故障，直接进入死信）。消费端只依据 [`DispatchError::kind`] 分支。

use pipeline_shared::error::PipelineError;

/// 失败类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Retryable,
    NonRetryable,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retryable => "retryable",
            Self::NonRetryable => "non_retryable",
        }
    }
}

/// 单条订单处理错误
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// 库存服务 5xx、连接失败、超时或 DNS 解析失败
    #[error("可重试错误: {0}")]
    Retryable(String),

    /// 库存服务 4xx 等非 200 响应、格式异常的可用性结果、无法处理的消息
    #[error("不可重试错误: {0}")]
    NonRetryable(String),

    /// 透传共享库错误（发布失败等），按其自身的瞬时标记分类
    #[error(transparent)]
    Shared(#[from] PipelineError),
}

impl DispatchError {
    /// 错误类别，未明确标记为可重试的一律视为不可重试
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Retryable(_) => FailureKind::Retryable,
            Self::NonRetryable(_) => FailureKind::NonRetryable,
            Self::Shared(e) if e.is_retryable() => FailureKind::Retryable,
            Self::Shared(_) => FailureKind::NonRetryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == FailureKind::Retryable
    }
}
