//! 库存服务 HTTP 客户端
//!
//! 通过 `GET {endpoint}?item={item}` 查询商品可用性，并把传输层结果归入错误分类：
//! - 200：原样返回响应体（预期为 `true` / `false`）
//! - 5xx、连接失败、超时、DNS 失败：可重试
//! - 4xx 及其他非 200 响应：不可重试
//!
//! 客户端本身不做重试，重试由消费端统一负责。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use pipeline_shared::config::DispatchConfig;
use pipeline_shared::observability::metrics::record_stock_request;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::error::DispatchError;

// ---------------------------------------------------------------------------
// Trait 抽象 — 便于测试时替换为 mock 实现
// ---------------------------------------------------------------------------

/// 库存可用性查询接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StockService: Send + Sync {
    /// 查询商品可用性，成功时返回库存服务的原始响应体
    async fn check_availability(&self, item: &str) -> Result<String, DispatchError>;
}

/// 将库存服务响应体解析为可用性
///
/// 只有忽略大小写后恰好为 `true` 的响应体表示可用，首尾空白不做裁剪。
/// 宽松模式下其他内容一律视为不可用；严格模式下 `true` / `false` 以外的内容为不可重试错误。
pub fn parse_availability(body: &str, strict: bool) -> Result<bool, DispatchError> {
    if body.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if body.eq_ignore_ascii_case("false") || !strict {
        Ok(false)
    } else {
        Err(DispatchError::NonRetryable(format!(
            "库存服务返回了无法识别的可用性结果: {body:?}"
        )))
    }
}

// ---------------------------------------------------------------------------
// HTTP 客户端实现
// ---------------------------------------------------------------------------

/// 基于 reqwest 的库存服务客户端
///
/// 内部连接池进程级共享，可安全地被多个消费任务并发使用。
#[derive(Clone)]
pub struct StockServiceClient {
    client: reqwest::Client,
    endpoint: String,
}

impl StockServiceClient {
    pub fn new(config: &DispatchConfig) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(|e| DispatchError::NonRetryable(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.stock_service_endpoint.clone(),
        })
    }

    /// 查询地址，`item` 原样拼接到查询串中
    pub fn request_url(&self, item: &str) -> String {
        format!("{}?item={}", self.endpoint, item)
    }

    async fn fetch(&self, item: &str) -> Result<String, DispatchError> {
        let url = self.request_url(item);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| classify_transport_error(&url, e))?;

        let status = response.status();
        if status == StatusCode::OK {
            return response
                .text()
                .await
                .map_err(|e| DispatchError::Retryable(format!("读取库存服务响应失败: {e}")));
        }

        let message = format!("库存服务返回 HTTP {}: {url}", status.as_u16());
        if status.is_server_error() {
            Err(DispatchError::Retryable(message))
        } else {
            Err(DispatchError::NonRetryable(message))
        }
    }
}

#[async_trait]
impl StockService for StockServiceClient {
    async fn check_availability(&self, item: &str) -> Result<String, DispatchError> {
        let started = Instant::now();
        let result = self.fetch(item).await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(body) => {
                debug!(item, body = %body, "库存服务响应");
                record_stock_request("ok", elapsed);
            }
            Err(e) => {
                warn!(item, error = %e, "库存服务调用失败");
                record_stock_request(e.kind().as_str(), elapsed);
            }
        }

        result
    }
}

/// 连接失败、超时（含 DNS 解析失败）属于瞬时故障，其余请求错误视为永久故障
fn classify_transport_error(url: &str, err: reqwest::Error) -> DispatchError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        DispatchError::Retryable(format!("库存服务不可达 {url}: {err}"))
    } else {
        DispatchError::NonRetryable(format!("库存服务请求失败 {url}: {err}"))
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
