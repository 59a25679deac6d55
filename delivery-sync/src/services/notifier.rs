//! 通知协作方（推送送达机制在外部）

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 接收方类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecipientType {
    Store,
    Courier,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub recipient_id: String,
    pub recipient_type: RecipientType,
    pub message: String,
    /// 关联的本地订单 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

impl Notification {
    pub fn store(tenant_id: &str, order_id: &str, message: impl Into<String>) -> Self {
        Self {
            recipient_id: tenant_id.to_string(),
            recipient_type: RecipientType::Store,
            message: message.into(),
            order_id: Some(order_id.to_string()),
        }
    }

    pub fn courier(courier_id: &str, order_id: &str, message: impl Into<String>) -> Self {
        Self {
            recipient_id: courier_id.to_string(),
            recipient_type: RecipientType::Courier,
            message: message.into(),
            order_id: Some(order_id.to_string()),
        }
    }
}

/// Fire-and-forget：实现方自行吞掉发送失败
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification);
}

pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, notification: Notification) {
        tracing::info!(
            recipient = %notification.recipient_id,
            recipient_type = ?notification.recipient_type,
            order_id = ?notification.order_id,
            "{}",
            notification.message
        );
    }
}
