use marketplace_client::MarketplaceConfig;
use marketplace_client::config::DEFAULT_BASE_URL;
use std::path::PathBuf;
use std::time::Duration;

/// 同步服务配置
///
/// # 环境变量
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | /var/lib/crab/delivery | 工作目录（redb 数据文件） |
/// | MARKETPLACE_BASE_URL | https://merchant-api.ifood.com.br | 平台 API 地址 |
/// | MARKETPLACE_TIMEOUT_MS | 15000 | HTTP 超时(毫秒) |
/// | POLL_INTERVAL_SECS | 30 | 轮询间隔 |
/// | POLL_ERROR_THRESHOLD | 5 | 连续失败多少次后熔断 |
/// | POLL_COOLDOWN_SECS | 300 | 熔断冷却时间 |
/// | SCHEDULE_SWEEP_INTERVAL_SECS | 300 | 预约订单补偿扫描间隔 |
/// | SCHEDULE_SWEEP_WINDOW_SECS | 86400 | 补偿扫描回看窗口 |
/// | DISPUTE_SWEEP_INTERVAL_SECS | 300 | 协商过期扫描间隔 |
/// | DISPUTE_DEFAULT_TTL_SECS | 86400 | 事件未携带过期时间时的默认有效期 |
/// | TENANTS_FILE | `<WORK_DIR>/tenants.json` | 租户凭证文件 |
/// | LOG_LEVEL | info | 日志级别 |
/// | LOG_DIR | - | 日志目录（不设置则只输出到终端） |
///
/// # 示例
///
/// ```ignore
/// WORK_DIR=/data/delivery POLL_INTERVAL_SECS=10 cargo run -p delivery-sync
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录
    pub work_dir: String,
    pub marketplace_base_url: String,
    pub marketplace_timeout_ms: u64,

    // === 轮询 ===
    pub poll_interval_secs: u64,
    pub poll_error_threshold: u32,
    pub poll_cooldown_secs: u64,

    // === 后台扫描 ===
    pub schedule_sweep_interval_secs: u64,
    pub schedule_sweep_window_secs: u64,
    pub dispute_sweep_interval_secs: u64,
    pub dispute_default_ttl_secs: u64,

    /// 租户凭证文件（None 表示 `<work_dir>/tenants.json`）
    pub tenants_file: Option<String>,
    pub log_level: String,
    pub log_dir: Option<String>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置，使用默认值
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/crab/delivery".into()),
            marketplace_base_url: std::env::var("MARKETPLACE_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.into()),
            marketplace_timeout_ms: env_or("MARKETPLACE_TIMEOUT_MS", 15_000),
            poll_interval_secs: env_or("POLL_INTERVAL_SECS", 30),
            poll_error_threshold: env_or("POLL_ERROR_THRESHOLD", 5),
            poll_cooldown_secs: env_or("POLL_COOLDOWN_SECS", 300),
            schedule_sweep_interval_secs: env_or("SCHEDULE_SWEEP_INTERVAL_SECS", 300),
            schedule_sweep_window_secs: env_or("SCHEDULE_SWEEP_WINDOW_SECS", 86_400),
            dispute_sweep_interval_secs: env_or("DISPUTE_SWEEP_INTERVAL_SECS", 300),
            dispute_default_ttl_secs: env_or("DISPUTE_DEFAULT_TTL_SECS", 86_400),
            tenants_file: std::env::var("TENANTS_FILE").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_dir: std::env::var("LOG_DIR").ok(),
        }
    }

    /// 使用自定义工作目录
    ///
    /// 常用于测试场景
    pub fn with_overrides(work_dir: impl Into<String>) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.tenants_file = None;
        config
    }

    pub fn marketplace(&self) -> MarketplaceConfig {
        MarketplaceConfig::new(&self.marketplace_base_url)
            .with_timeout_ms(self.marketplace_timeout_ms)
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("delivery-sync.redb")
    }

    pub fn tenants_path(&self) -> PathBuf {
        match &self.tenants_file {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(&self.work_dir).join("tenants.json"),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_cooldown(&self) -> Duration {
        Duration::from_secs(self.poll_cooldown_secs)
    }

    pub fn schedule_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_sweep_interval_secs)
    }

    pub fn schedule_sweep_window(&self) -> Duration {
        Duration::from_secs(self.schedule_sweep_window_secs)
    }

    pub fn dispute_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.dispute_sweep_interval_secs)
    }

    pub fn dispute_default_ttl(&self) -> Duration {
        Duration::from_secs(self.dispute_default_ttl_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
