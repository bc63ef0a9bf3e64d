//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl MetricsHandle {
    /// 停止指标 HTTP 服务器
    pub fn shutdown(self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 与 `/health` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册通用指标
///
/// 这些描述会出现在 /metrics 端点的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "dispatch_records_received_total",
        "Total number of order.created records received"
    );
    metrics::describe_counter!(
        "dispatch_orders_dispatched_total",
        "Total number of orders published as dispatched"
    );
    metrics::describe_counter!(
        "dispatch_orders_unavailable_total",
        "Total number of orders skipped because the item was unavailable"
    );
    metrics::describe_counter!(
        "dispatch_retries_total",
        "Total number of in-place retries of a unit of work"
    );
    metrics::describe_counter!(
        "dispatch_dead_lettered_total",
        "Total number of records forwarded to the dead-letter topic"
    );
    metrics::describe_histogram!(
        "dispatch_unit_of_work_duration_seconds",
        "Duration of one unit of work, retries included"
    );

    metrics::describe_counter!(
        "stock_service_requests_total",
        "Total number of stock service availability checks"
    );
    metrics::describe_histogram!(
        "stock_service_request_duration_seconds",
        "Stock service request duration in seconds"
    );

    metrics::describe_counter!("retry_attempts_total", "Total number of retry attempts");

    // 记录服务启动
    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录收到一条入站记录
#[inline]
pub fn record_received(topic: &str) {
    metrics::counter!("dispatch_records_received_total", "topic" => topic.to_string())
        .increment(1);
}

/// 记录一次工作单元的结果与耗时
///
/// `outcome` 取值：dispatched / unavailable / dead_lettered / failed
#[inline]
pub fn record_unit_of_work(outcome: &str, duration_secs: f64) {
    match outcome {
        "dispatched" => metrics::counter!("dispatch_orders_dispatched_total").increment(1),
        "unavailable" => metrics::counter!("dispatch_orders_unavailable_total").increment(1),
        _ => {}
    }

    metrics::histogram!(
        "dispatch_unit_of_work_duration_seconds",
        "outcome" => outcome.to_string()
    )
    .record(duration_secs);
}

/// 记录一次原地重试
#[inline]
pub fn record_retry() {
    metrics::counter!("dispatch_retries_total").increment(1);
}

/// 记录库存服务调用
///
/// `outcome` 取值：ok / retryable / non_retryable
#[inline]
pub fn record_stock_request(outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "stock_service_requests_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "stock_service_request_duration_seconds",
        "outcome" => outcome.to_string()
    )
    .record(duration_secs);
}
