//! Kafka 消费绑定
//!
//! 将 `order.created` 的每条记录交给 DispatchProcessor，并把处理结果映射为
//! offset 推进、原地重试或死信投递：
//! - 处理成功（含商品不可用）：存储 offset
//! - 可重试错误：按退避策略原地重试同一条记录，耗尽后投递死信
//! - 其他错误（含反序列化和类型校验失败）：立即投递死信
//!
//! 死信投递本身失败时返回错误，消费循环回退 offset 重新投递该记录，不会越过它。

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use pipeline_shared::config::{AppConfig, KafkaConfig};
use pipeline_shared::dlq::{DeadLetterReason, DeadLetterRecord, DeadLetterSink};
use pipeline_shared::error::PipelineError;
use pipeline_shared::events::{OrderCreated, TypeTrust};
use pipeline_shared::kafka::{ConsumerMessage, KafkaConsumer, topics};
use pipeline_shared::observability::metrics::{
    record_received, record_retry, record_unit_of_work,
};
use pipeline_shared::retry::{RetryPolicy, retry_with_policy};
use tokio::sync::watch;
use tracing::{error, info};

use crate::error::{DispatchError, FailureKind};
use crate::processor::{DispatchOutcome, DispatchProcessor};

/// 单条记录的最终去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Dispatched,
    Unavailable,
    DeadLettered(DeadLetterReason),
}

impl From<DispatchOutcome> for RecordOutcome {
    fn from(outcome: DispatchOutcome) -> Self {
        match outcome {
            DispatchOutcome::Dispatched => Self::Dispatched,
            DispatchOutcome::Unavailable => Self::Unavailable,
        }
    }
}

/// 处理单条记录所需的全部组件
///
/// 各消费任务共享同一份，内部组件均可并发使用。
pub struct RecordPipeline {
    pub processor: DispatchProcessor,
    pub dead_letters: Arc<dyn DeadLetterSink>,
    pub trust: TypeTrust,
    pub retry_policy: RetryPolicy,
}

/// 下单事件消费绑定
///
/// 同一消费组内启动 `kafka.concurrency` 个消费者，分区由组协议在它们之间分配；
/// 每个消费者串行处理自己的分区，分区内严格按 offset 顺序。
pub struct ConsumerBinding {
    kafka: KafkaConfig,
    pipeline: Arc<RecordPipeline>,
}

impl ConsumerBinding {
    pub fn new(
        config: &AppConfig,
        processor: DispatchProcessor,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        let pipeline = RecordPipeline {
            processor,
            dead_letters,
            trust: TypeTrust::new(config.serialization.trusted_packages.iter().cloned()),
            retry_policy: RetryPolicy::from(&config.retry),
        };

        Self {
            kafka: config.kafka.clone(),
            pipeline: Arc::new(pipeline),
        }
    }

    /// 启动全部消费任务，直到收到 shutdown 信号且在途记录处理完毕
    ///
    /// 所有消费者创建并订阅成功后才开始消费，任何一个失败都不会留下已启动的任务。
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), DispatchError> {
        let concurrency = self.kafka.concurrency.max(1);
        let mut consumers = Vec::with_capacity(concurrency);

        for idx in 0..concurrency {
            let consumer = KafkaConsumer::new(&self.kafka, Some(idx.to_string().as_str()))?;
            consumer.subscribe(&[topics::ORDER_CREATED])?;
            consumers.push(consumer);
        }

        let tasks: Vec<_> = consumers
            .into_iter()
            .map(|consumer| {
                let pipeline = self.pipeline.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    consumer
                        .start(shutdown, |msg| {
                            let pipeline = pipeline.clone();
                            async move { handle_record(&pipeline, &msg).await.map(|_| ()) }
                        })
                        .await;
                })
            })
            .collect();

        info!(
            topic = topics::ORDER_CREATED,
            group_id = %self.kafka.consumer_group,
            concurrency,
            worker_id = %self.pipeline.processor.worker_id(),
            "订单发货消费者已启动"
        );

        for task in futures::future::join_all(tasks).await {
            if let Err(e) = task {
                error!(error = %e, "消费任务异常退出");
            }
        }

        info!("订单发货消费者已停止");
        Ok(())
    }
}

/// 处理单条记录的完整流程
///
/// 拆分为独立函数，测试中无需 broker 即可驱动。
/// 返回 `Ok` 表示记录已经落地（发货、跳过或进入死信），可以推进 offset；
/// 返回 `Err` 仅在死信投递失败时出现，调用方必须重新投递该记录。
pub async fn handle_record(
    pipeline: &RecordPipeline,
    msg: &ConsumerMessage,
) -> Result<RecordOutcome, PipelineError> {
    let started = Instant::now();
    record_received(&msg.topic);

    // 1. 分区键是出站和死信记录的路由依据
    let Some(key) = msg.key.as_deref() else {
        let failure = DispatchError::NonRetryable("记录缺少分区键".to_string());
        return dead_letter(pipeline, msg, DeadLetterReason::NonRetryable, &failure, started).await;
    };

    // 2. 类型校验 + 反序列化，失败的记录不会被重试
    let event: OrderCreated = match pipeline.trust.decode(&msg.headers, &msg.payload) {
        Ok(event) => event,
        Err(e) => {
            let failure = DispatchError::NonRetryable(e.to_string());
            return dead_letter(pipeline, msg, DeadLetterReason::NonRetryable, &failure, started)
                .await;
        }
    };

    info!(
        partition = msg.partition,
        offset = msg.offset,
        key,
        order_id = %event.order_id,
        "收到下单事件"
    );

    // 3. 可重试错误原地退避重试，期间不会处理同分区的后续记录
    let attempts = AtomicU32::new(0);
    let attempts = &attempts;
    let processor = &pipeline.processor;
    let event = &event;

    let result = retry_with_policy(
        &pipeline.retry_policy,
        "dispatch_order",
        DispatchError::is_retryable,
        move || {
            if attempts.fetch_add(1, Ordering::SeqCst) > 0 {
                record_retry();
            }
            processor.process(key, event)
        },
    )
    .await;

    match result {
        Ok(outcome) => {
            record_unit_of_work(outcome.as_str(), started.elapsed().as_secs_f64());
            Ok(outcome.into())
        }
        Err(failure) => {
            let reason = match failure.kind() {
                FailureKind::Retryable => DeadLetterReason::RetriesExhausted,
                FailureKind::NonRetryable => DeadLetterReason::NonRetryable,
            };
            error!(
                order_id = %event.order_id,
                key,
                attempts = attempts.load(Ordering::SeqCst),
                reason = %reason,
                error = %failure,
                "订单处理失败，转入死信"
            );
            dead_letter(pipeline, msg, reason, &failure, started).await
        }
    }
}

async fn dead_letter(
    pipeline: &RecordPipeline,
    msg: &ConsumerMessage,
    reason: DeadLetterReason,
    failure: &DispatchError,
    started: Instant,
) -> Result<RecordOutcome, PipelineError> {
    let record = DeadLetterRecord::from_message(msg, reason, failure.to_string());

    match pipeline.dead_letters.publish(&record).await {
        Ok(()) => {
            record_unit_of_work("dead_lettered", started.elapsed().as_secs_f64());
            Ok(RecordOutcome::DeadLettered(reason))
        }
        Err(e) => {
            record_unit_of_work("failed", started.elapsed().as_secs_f64());
            Err(e)
        }
    }
}
