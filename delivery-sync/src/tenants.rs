//! 租户配置与商户索引
//!
//! 租户凭证文件是 JSON 数组：
//!
//! ```json
//! [{ "tenant_id": "t-1", "merchant_id": "m-1", "client_id": "...", "client_secret": "..." }]
//! ```
//!
//! 密钥只保存在内存中（交给 CredentialManager），从不写入 redb。

use dashmap::DashMap;
use marketplace_client::TenantSecrets;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TenantFileError {
    #[error("Failed to read tenants file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid tenants file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("Duplicate tenant {0} in tenants file")]
    Duplicate(String),
}

/// 单个租户的接入配置
#[derive(Clone, Deserialize)]
pub struct TenantConfig {
    pub tenant_id: String,
    pub merchant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl TenantConfig {
    pub fn secrets(&self) -> TenantSecrets {
        TenantSecrets::new(&self.client_id, &self.client_secret)
    }
}

impl fmt::Debug for TenantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantConfig")
            .field("tenant_id", &self.tenant_id)
            .field("merchant_id", &self.merchant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}

/// 读取租户凭证文件
pub fn load_tenants(path: impl AsRef<Path>) -> Result<Vec<TenantConfig>, TenantFileError> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| TenantFileError::Io {
        path: display.clone(),
        source,
    })?;
    let tenants: Vec<TenantConfig> =
        serde_json::from_str(&raw).map_err(|source| TenantFileError::Parse {
            path: display,
            source,
        })?;

    let mut seen = std::collections::HashSet::new();
    for tenant in &tenants {
        if !seen.insert(tenant.tenant_id.as_str()) {
            return Err(TenantFileError::Duplicate(tenant.tenant_id.clone()));
        }
    }
    Ok(tenants)
}

/// 商户 ID ↔ 租户 ID 索引（Webhook 没有租户上下文时用于回溯）
#[derive(Default)]
pub struct TenantRegistry {
    by_merchant: DashMap<String, String>,
    by_tenant: DashMap<String, String>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tenant_id: impl Into<String>, merchant_id: impl Into<String>) {
        let tenant_id = tenant_id.into();
        let merchant_id = merchant_id.into();
        if let Some(previous) = self.by_tenant.insert(tenant_id.clone(), merchant_id.clone())
            && previous != merchant_id
        {
            self.by_merchant.remove(&previous);
        }
        self.by_merchant.insert(merchant_id, tenant_id);
    }

    pub fn remove(&self, tenant_id: &str) -> bool {
        match self.by_tenant.remove(tenant_id) {
            Some((_, merchant_id)) => {
                self.by_merchant.remove(&merchant_id);
                true
            }
            None => false,
        }
    }

    pub fn tenant_for_merchant(&self, merchant_id: &str) -> Option<String> {
        self.by_merchant.get(merchant_id).map(|t| t.value().clone())
    }

    pub fn merchant_for_tenant(&self, tenant_id: &str) -> Option<String> {
        self.by_tenant.get(tenant_id).map(|m| m.value().clone())
    }

    pub fn len(&self) -> usize {
        self.by_tenant.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tenant.is_empty()
    }
}
