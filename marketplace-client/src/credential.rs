//! 租户凭证管理
//!
//! 每个租户持有一个 access token，到期前透明刷新。
//!
//! ```text
//! get_valid_token(tenant)
//!     ├─ 1. 获取租户槽位的异步锁（同租户的并发请求在此排队）
//!     ├─ 2. 缓存令牌剩余有效期 > 安全缓冲 → 直接返回
//!     ├─ 3. 否则作废旧令牌，调用 TokenExchange 刷新
//!     └─ 4. 刷新失败原样向上传播（不重试）
//! ```
//!
//! 等待锁的调用方在锁释放后会看到刚刷新的令牌，因此同一租户任意时刻最多只有
//! 一个刷新请求在途。

use crate::config::MarketplaceConfig;
use crate::error::{MarketplaceError, MarketplaceResult};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use shared::marketplace::TokenResponse;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// 剩余有效期低于该值时强制刷新
pub const TOKEN_SAFETY_BUFFER: Duration = Duration::from_secs(5 * 60);

const OAUTH_TOKEN_PATH: &str = "/authentication/v1.0/oauth/token";

// ============================================================================
// Secrets / Token
// ============================================================================

/// 租户的客户端凭证（只存在于内存中）
#[derive(Clone, Deserialize)]
pub struct TenantSecrets {
    pub client_id: String,
    pub client_secret: String,
}

impl TenantSecrets {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl fmt::Debug for TenantSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantSecrets")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}

/// Bearer token
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

struct CachedToken {
    token: AccessToken,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, buffer: Duration) -> bool {
        self.expires_at.saturating_duration_since(Instant::now()) > buffer
    }
}

struct TenantSlot {
    secrets: TenantSecrets,
    token: Mutex<Option<CachedToken>>,
}

// ============================================================================
// Token Exchange
// ============================================================================

/// 凭证交换（client credentials → access token）
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self, secrets: &TenantSecrets) -> MarketplaceResult<TokenResponse>;
}

/// 基于 HTTP 的凭证交换
pub struct HttpTokenExchange {
    client: reqwest::Client,
    token_url: String,
}

impl HttpTokenExchange {
    pub fn new(config: &MarketplaceConfig) -> MarketplaceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            token_url: format!("{}{}", config.base_url(), OAUTH_TOKEN_PATH),
        })
    }
}

#[async_trait]
impl TokenExchange for HttpTokenExchange {
    async fn exchange(&self, secrets: &TenantSecrets) -> MarketplaceResult<TokenResponse> {
        let form = [
            ("grantType", "client_credentials"),
            ("clientId", secrets.client_id.as_str()),
            ("clientSecret", secrets.client_secret.as_str()),
        ];

        let response = self.client.post(&self.token_url).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MarketplaceError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

// ============================================================================
// Credential Manager
// ============================================================================

/// 多租户凭证管理器
///
/// 以租户 ID 为键，租户之间互不共享任何状态。
pub struct CredentialManager {
    exchange: Arc<dyn TokenExchange>,
    tenants: DashMap<String, Arc<TenantSlot>>,
    safety_buffer: Duration,
}

impl CredentialManager {
    pub fn new(exchange: Arc<dyn TokenExchange>) -> Self {
        Self {
            exchange,
            tenants: DashMap::new(),
            safety_buffer: TOKEN_SAFETY_BUFFER,
        }
    }

    /// 注册（或替换）租户凭证，替换时旧令牌一并丢弃
    pub fn register_tenant(&self, tenant_id: impl Into<String>, secrets: TenantSecrets) {
        let tenant_id = tenant_id.into();
        tracing::debug!(tenant_id = %tenant_id, client_id = %secrets.client_id, "Registered marketplace credentials");
        self.tenants.insert(
            tenant_id,
            Arc::new(TenantSlot {
                secrets,
                token: Mutex::new(None),
            }),
        );
    }

    pub fn remove_tenant(&self, tenant_id: &str) -> bool {
        self.tenants.remove(tenant_id).is_some()
    }

    /// 获取有效令牌，必要时同步刷新
    pub async fn get_valid_token(&self, tenant_id: &str) -> MarketplaceResult<AccessToken> {
        let slot = self.slot(tenant_id)?;
        let mut cached = slot.token.lock().await;

        if let Some(token) = cached.as_ref()
            && token.is_fresh(self.safety_buffer)
        {
            return Ok(token.token.clone());
        }

        // 旧令牌先作废：刷新失败时不能再被使用
        *cached = None;

        let response = self
            .exchange
            .exchange(&slot.secrets)
            .await
            .map_err(|e| {
                tracing::error!(tenant_id = %tenant_id, error = %e, "Marketplace token refresh failed");
                MarketplaceError::Credential {
                    tenant_id: tenant_id.to_string(),
                    reason: e.to_string(),
                }
            })?;

        let ttl = Duration::from_secs(response.expires_in);
        if ttl <= self.safety_buffer {
            return Err(MarketplaceError::Credential {
                tenant_id: tenant_id.to_string(),
                reason: format!(
                    "token ttl {}s is not longer than the {}s safety buffer",
                    ttl.as_secs(),
                    self.safety_buffer.as_secs()
                ),
            });
        }

        let token = AccessToken::new(response.access_token);
        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + ttl,
        });
        tracing::info!(tenant_id = %tenant_id, ttl_secs = ttl.as_secs(), "Marketplace token refreshed");

        Ok(token)
    }

    /// 驱逐缓存令牌（收到 401 后调用），下次获取时强制刷新
    pub async fn evict(&self, tenant_id: &str) {
        if let Some(slot) = self.tenants.get(tenant_id).map(|s| Arc::clone(&s)) {
            let evicted = slot.token.lock().await.take().is_some();
            if evicted {
                tracing::debug!(tenant_id = %tenant_id, "Evicted cached marketplace token");
            }
        }
    }

    /// 缓存令牌的剩余有效期（未缓存返回 None）
    pub async fn remaining_ttl(&self, tenant_id: &str) -> Option<Duration> {
        let slot = self.tenants.get(tenant_id).map(|s| Arc::clone(&s))?;
        let cached = slot.token.lock().await;
        cached
            .as_ref()
            .map(|t| t.expires_at.saturating_duration_since(Instant::now()))
    }

    fn slot(&self, tenant_id: &str) -> MarketplaceResult<Arc<TenantSlot>> {
        // clone 出 Arc，避免持有 DashMap 分片锁跨越 await
        self.tenants
            .get(tenant_id)
            .map(|s| Arc::clone(&s))
            .ok_or_else(|| MarketplaceError::UnknownTenant(tenant_id.to_string()))
    }
}
