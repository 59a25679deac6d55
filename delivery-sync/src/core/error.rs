use crate::storage::StorageError;
use marketplace_client::MarketplaceError;
use shared::dispute::DisputeStatus;
use shared::order::OrderStatus;
use thiserror::Error;

/// 同步核心错误
#[derive(Debug, Error)]
pub enum SyncError {
    /// 租户凭证无效或刷新失败
    #[error("Credential error for tenant {tenant_id}: {reason}")]
    Credential { tenant_id: String, reason: String },

    /// 平台 401（重试后仍然失败）
    #[error("Marketplace authorization expired")]
    AuthExpired,

    /// 网络超时、5xx、限流
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// 平台返回非成功响应（不可重试）
    #[error("Marketplace rejected request: {0}")]
    Marketplace(String),

    #[error("Order {order_id} already terminal ({status})")]
    OrderAlreadyTerminal { order_id: String, status: OrderStatus },

    #[error("Duplicate event {event_id}")]
    DuplicateEvent { event_id: String },

    /// 激活与其他迁移竞争失败
    #[error("Scheduled activation lost race for order {order_id} (now {status})")]
    ScheduleRace { order_id: String, status: OrderStatus },

    #[error("Invalid transition for order {order_id}: {from} on {trigger}")]
    InvalidTransition {
        order_id: String,
        from: OrderStatus,
        trigger: String,
    },

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Dispute not found: {0}")]
    DisputeNotFound(String),

    #[error("Dispute {dispute_id} is {status}, cannot respond")]
    InvalidDisputeState {
        dispute_id: String,
        status: DisputeStatus,
    },

    #[error("Cannot resolve tenant for order {0}")]
    UnresolvedTenant(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// 在路由边界吞掉（只记 debug 日志）的错误
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            SyncError::OrderAlreadyTerminal { .. }
                | SyncError::DuplicateEvent { .. }
                | SyncError::ScheduleRace { .. }
                | SyncError::InvalidTransition { .. }
        )
    }

    /// 批量路由中需要终止本轮的错误（批处理完后上报）
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Credential { .. } | SyncError::Storage(_))
    }

    /// 单个事件失败后，平台重投可能成功（不确认该事件）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Credential { .. }
                | SyncError::AuthExpired
                | SyncError::TransientNetwork(_)
                | SyncError::Storage(_)
        )
    }
}

impl From<MarketplaceError> for SyncError {
    fn from(err: MarketplaceError) -> Self {
        match err {
            MarketplaceError::Credential { tenant_id, reason } => {
                SyncError::Credential { tenant_id, reason }
            }
            MarketplaceError::UnknownTenant(tenant_id) => SyncError::Credential {
                tenant_id,
                reason: "tenant not registered".to_string(),
            },
            MarketplaceError::AuthExpired => SyncError::AuthExpired,
            MarketplaceError::Transient(msg) => SyncError::TransientNetwork(msg),
            MarketplaceError::Api { status, body } => {
                SyncError::Marketplace(format!("status {status}: {body}"))
            }
            MarketplaceError::InvalidResponse(msg) => SyncError::Marketplace(msg),
        }
    }
}
