//! Marketplace client configuration

use std::time::Duration;

/// 默认平台 API 地址
pub const DEFAULT_BASE_URL: &str = "https://merchant-api.ifood.com.br";

/// Marketplace client configuration
#[derive(Debug, Clone)]
pub struct MarketplaceConfig {
    base_url: String,
    timeout_ms: u64,
}

impl MarketplaceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout_ms: 15_000,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}
