//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Kafka 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    #[serde(alias = "bootstrap-servers")]
    pub bootstrap_servers: String,
    pub consumer_group: String,
    pub auto_offset_reset: String,
    /// 同一消费组内启动的消费者实例数，分区是并行的最小单位
    pub concurrency: usize,
    pub producer_timeout_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            consumer_group: "dispatch.order.created.consumer".to_string(),
            auto_offset_reset: "earliest".to_string(),
            concurrency: 1,
            producer_timeout_ms: 5000,
        }
    }
}

impl KafkaConfig {
    pub fn producer_timeout(&self) -> Duration {
        Duration::from_millis(self.producer_timeout_ms)
    }
}

/// 库存服务调用配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    #[serde(alias = "stockServiceEndpoint", alias = "stockserviceendpoint")]
    pub stock_service_endpoint: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub pool_max_idle_per_host: usize,
    /// 为 true 时，库存服务返回 true/false 以外的内容视为永久错误
    pub strict_availability: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            stock_service_endpoint: "http://localhost:9001/api/stock".to_string(),
            connect_timeout_ms: 2000,
            request_timeout_ms: 5000,
            pool_max_idle_per_host: 16,
            strict_availability: false,
        }
    }
}

/// 重试配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 首次执行之后的最大重试次数
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 200,
            max_delay_ms: 5000,
            multiplier: 2.0,
        }
    }
}

/// 反序列化安全配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerializationConfig {
    /// 允许的 `__TypeId__` 命名空间，`*` 表示全部信任
    pub trusted_packages: Vec<String>,
}

impl Default for SerializationConfig {
    fn default() -> Self {
        Self {
            trusted_packages: vec![crate::events::MESSAGE_NAMESPACE.to_string()],
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 服务名称，由 AppConfig 在加载后注入
    #[serde(skip)]
    pub service_name: String,
    pub log_level: String,
    /// 是否启用 JSON 格式日志
    pub json_logs: bool,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown-service".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_port: 9090,
        }
    }
}

impl ObservabilityConfig {
    pub fn with_service_name(mut self, service_name: &str) -> Self {
        self.service_name = service_name.to_string();
        self
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub kafka: KafkaConfig,
    pub dispatch: DispatchConfig,
    pub retry: RetryConfig,
    pub serialization: SerializationConfig,
    pub observability: ObservabilityConfig,
    /// 关闭时等待在途消息处理和生产者 flush 的最长时间
    pub shutdown_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: "dispatch-service".to_string(),
            environment: "development".to_string(),
            kafka: KafkaConfig::default(),
            dispatch: DispatchConfig::default(),
            retry: RetryConfig::default(),
            serialization: SerializationConfig::default(),
            observability: ObservabilityConfig::default(),
            shutdown_timeout_secs: 30,
        }
    }
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（DISPATCH 前缀，双下划线分隔，如 DISPATCH__KAFKA__BOOTSTRAP_SERVERS -> kafka.bootstrap_servers）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("DISPATCH_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            // 单下划线会与字段名冲突（bootstrap_servers），因此使用双下划线分隔层级
            .add_source(
                Environment::with_prefix("DISPATCH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut config: Self = builder.build()?.try_deserialize()?;
        config.observability.service_name = config.service_name.clone();

        Ok(config)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
