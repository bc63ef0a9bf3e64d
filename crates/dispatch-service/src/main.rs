//! 订单发货服务
//!
//! 消费 `order.created`，确认库存后发布 `order.dispatched`。

use std::sync::Arc;

use anyhow::Result;
use pipeline_shared::{
    config::AppConfig,
    dlq::DeadLetterPublisher,
    kafka::KafkaProducer,
    observability,
    retry::RetryPolicy,
};
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{error, info, warn};

use dispatch_service::{
    consumer::ConsumerBinding,
    error::DispatchError,
    processor::{DispatchProcessor, WorkerId},
    publisher::KafkaPublisher,
    stock_client::StockServiceClient,
};

const SERVICE_NAME: &str = "dispatch-service";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置，失败时使用默认值，待日志初始化后再输出原因
    let (config, load_error) = match AppConfig::load(SERVICE_NAME) {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    // 2. 初始化可观测性
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    if let Some(e) = load_error {
        warn!("Failed to load config, using defaults: {}", e);
    }

    info!(
        service = %config.service_name,
        environment = %config.environment,
        brokers = %config.kafka.bootstrap_servers,
        stock_endpoint = %config.dispatch.stock_service_endpoint,
        "Starting dispatch-service..."
    );

    // 3. 构建组件：工作进程标识只在启动时生成一次
    let worker_id = WorkerId::generate();
    let producer = KafkaProducer::new(&config.kafka)?;
    let stock = Arc::new(StockServiceClient::new(&config.dispatch)?);
    let publisher = Arc::new(KafkaPublisher::new(producer.clone()));
    let dead_letters = Arc::new(DeadLetterPublisher::new(
        producer.clone(),
        RetryPolicy::from(&config.retry),
    ));

    let processor = DispatchProcessor::new(stock, publisher, worker_id)
        .with_strict_availability(config.dispatch.strict_availability);
    let binding = ConsumerBinding::new(&config, processor, dead_letters);

    info!(worker_id = %worker_id, "Worker identity assigned");

    // 4. 启动消费，等待关闭信号
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut consumers = tokio::spawn(binding.run(shutdown_rx));

    tokio::select! {
        _ = shutdown_signal() => {}
        result = &mut consumers => {
            // 消费任务提前退出（订阅失败等），无需再等待关闭信号，以非零状态退出
            flush_producer(producer, config.shutdown_timeout()).await;
            return early_exit(result);
        }
    }

    // 5. 停止拉取新记录，在截止时间内等待在途记录处理完成
    let _ = shutdown_tx.send(true);
    let deadline = config.shutdown_timeout();

    match tokio::time::timeout(deadline, consumers).await {
        Ok(Ok(Ok(()))) => info!("Consumers drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "Consumers exited with error"),
        Ok(Err(e)) => error!(error = %e, "Consumer task panicked"),
        Err(_) => warn!(
            timeout_secs = deadline.as_secs(),
            "Timed out waiting for in-flight records, uncommitted records will be redelivered"
        ),
    }

    // 6. 等待在途的发布确认
    flush_producer(producer, deadline).await;

    info!("Service shutdown complete");
    Ok(())
}

/// 消费任务在关闭信号之前退出，无论原因都视为进程失败
fn early_exit(result: Result<Result<(), DispatchError>, JoinError>) -> Result<()> {
    match result {
        Ok(Ok(())) => {
            warn!("Consumers stopped before shutdown signal");
            anyhow::bail!("consumers stopped before shutdown signal")
        }
        Ok(Err(e)) => {
            error!(error = %e, "Consumers failed to start");
            Err(e.into())
        }
        Err(e) => {
            error!(error = %e, "Consumer task panicked");
            Err(e.into())
        }
    }
}

/// 在阻塞线程上 flush 生产者，超时未确认的消息依赖重新投递
async fn flush_producer(producer: KafkaProducer, timeout: std::time::Duration) {
    match tokio::task::spawn_blocking(move || producer.flush(timeout)).await {
        Ok(Ok(())) => info!("Producer flushed"),
        Ok(Err(e)) => warn!(error = %e, "Producer flush incomplete"),
        Err(e) => error!(error = %e, "Producer flush task failed"),
    }
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号，用于 Kubernetes 优雅关闭
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
