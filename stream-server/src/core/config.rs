use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::bus::{BusConfig, FailurePolicy};

/// 服务器配置
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | /var/lib/flowstream | 工作目录 (redb 文件) |
/// | HTTP_PORT | 3000 | HTTP 服务端口 |
/// | ENVIRONMENT | development | 运行环境 |
/// | LOG_LEVEL | info | 日志级别 (RUST_LOG 优先) |
/// | LOG_JSON | false | JSON 日志 |
/// | LOG_DIR | - | 日志目录 (按天滚动) |
/// | EVENT_RETENTION_SECS | 86400 | 事件流保留时间 |
/// | SNAPSHOT_RETENTION_SECS | 604800 | 执行快照保留时间 |
/// | SWEEP_INTERVAL_SECS | 300 | 过期清理间隔 |
/// | SUBSCRIBER_CAPACITY | 256 | 每个 SSE 连接的缓冲 |
/// | LOCAL_FANOUT_CAPACITY | 1024 | 本地广播缓冲 |
/// | CONSUMER_GROUP | gateway | 路由器消费组 |
/// | FAILURE_POLICY | log | 处理失败策略 (log / dead_letter) |
/// | REQUEST_TIMEOUT_MS | 30000 | 非流式请求超时(毫秒) |
/// | SHUTDOWN_TIMEOUT_MS | 10000 | 关闭超时(毫秒) |
///
/// # 示例
///
/// ```ignore
/// WORK_DIR=/data/flowstream HTTP_PORT=8080 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录，存储数据库和日志
    pub work_dir: String,
    pub http_port: u16,
    /// 运行环境: development | staging | production
    pub environment: String,
    pub log_level: String,
    pub log_json: bool,
    pub log_dir: Option<String>,
    pub event_retention: Duration,
    pub snapshot_retention: Duration,
    pub sweep_interval: Duration,
    pub subscriber_capacity: usize,
    pub local_fanout_capacity: usize,
    pub consumer_group: String,
    pub failure_policy: FailurePolicy,
    pub request_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
}

/// Parse an environment variable, falling back to `default`
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置，使用默认值
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/flowstream".into()),
            http_port: env_or("HTTP_PORT", 3000),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_json: env_or("LOG_JSON", false),
            log_dir: std::env::var("LOG_DIR").ok().filter(|dir| !dir.is_empty()),
            event_retention: Duration::from_secs(env_or("EVENT_RETENTION_SECS", 86_400)),
            snapshot_retention: Duration::from_secs(env_or("SNAPSHOT_RETENTION_SECS", 604_800)),
            sweep_interval: Duration::from_secs(env_or("SWEEP_INTERVAL_SECS", 300).max(1)),
            subscriber_capacity: env_or("SUBSCRIBER_CAPACITY", 256).max(1),
            local_fanout_capacity: env_or("LOCAL_FANOUT_CAPACITY", 1024).max(1),
            consumer_group: std::env::var("CONSUMER_GROUP").unwrap_or_else(|_| "gateway".into()),
            failure_policy: env_or("FAILURE_POLICY", FailurePolicy::LogAndContinue),
            request_timeout_ms: env_or("REQUEST_TIMEOUT_MS", 30_000),
            shutdown_timeout_ms: env_or("SHUTDOWN_TIMEOUT_MS", 10_000),
        }
    }

    /// 使用自定义值覆盖部分配置
    ///
    /// 常用于测试场景
    pub fn with_overrides(work_dir: impl Into<String>, http_port: u16) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.http_port = http_port;
        config
    }

    /// 是否生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// redb file holding event streams and snapshots
    pub fn events_db_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("events.redb")
    }

    /// redb file holding the durable topic
    pub fn bus_db_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("bus.redb")
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            consumer_group: self.consumer_group.clone(),
            failure_policy: self.failure_policy,
            subscriber_capacity: self.subscriber_capacity,
            local_fanout_capacity: self.local_fanout_capacity,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
