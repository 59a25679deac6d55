//! Marketplace client error types

use thiserror::Error;

/// Marketplace client error type
#[derive(Debug, Clone, Error)]
pub enum MarketplaceError {
    /// 凭证交换失败（不在内部重试，由调用方决定退避策略）
    #[error("Credential refresh failed for tenant {tenant_id}: {reason}")]
    Credential { tenant_id: String, reason: String },

    /// 未注册的租户
    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),

    /// 平台返回 401，缓存的令牌已被驱逐
    #[error("Authorization expired")]
    AuthExpired,

    /// 超时 / 连接失败 / 5xx / 429
    #[error("Transient network error: {0}")]
    Transient(String),

    /// 其他非成功响应
    #[error("Marketplace API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// 响应无法解析
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl MarketplaceError {
    /// 是否为网络层面的暂时性故障
    pub fn is_transient(&self) -> bool {
        matches!(self, MarketplaceError::Transient(_))
    }
}

impl From<reqwest::Error> for MarketplaceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return MarketplaceError::InvalidResponse(err.to_string());
        }
        if let Some(status) = err.status() {
            if status.as_u16() == 401 {
                return MarketplaceError::AuthExpired;
            }
            if !status.is_server_error() && status.as_u16() != 429 {
                return MarketplaceError::Api {
                    status: status.as_u16(),
                    body: err.to_string(),
                };
            }
        }
        // timeout / connect / request / 5xx
        MarketplaceError::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for MarketplaceError {
    fn from(err: serde_json::Error) -> Self {
        MarketplaceError::InvalidResponse(err.to_string())
    }
}

/// Result type for marketplace operations
pub type MarketplaceResult<T> = Result<T, MarketplaceError>;
