//! 协商 / 结算记录

use serde::{Deserialize, Serialize};
use std::fmt;

/// 协商状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeStatus {
    Pending,
    Accepted,
    Rejected,
    CounterProposed,
    Expired,
    Settled,
}

impl DisputeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DisputeStatus::Pending => "PENDING",
            DisputeStatus::Accepted => "ACCEPTED",
            DisputeStatus::Rejected => "REJECTED",
            DisputeStatus::CounterProposed => "COUNTER_PROPOSED",
            DisputeStatus::Expired => "EXPIRED",
            DisputeStatus::Settled => "SETTLED",
        }
    }
}

impl fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 协商记录（按 dispute_id 唯一）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dispute {
    pub dispute_id: String,
    /// 平台订单 ID
    pub order_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub dispute_type: String,
    pub status: DisputeStatus,
    /// 响应截止 (Unix millis)
    pub expires_at: i64,
    /// 创建该记录的事件 ID（去重键）
    pub source_event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<serde_json::Value>,
    /// 商家响应的原因 / 反提案内容
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_note: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// 结算记录（按事件 ID 唯一，除回链外不可变）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settlement {
    pub event_id: String,
    pub order_id: String,
    /// 事件中声明的协商 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispute_ref: Option<String>,
    /// 已确认存在的协商 ID（可能晚于结算写入）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_dispute_id: Option<String>,
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<serde_json::Value>,
    pub created_at: i64,
}

/// 商家对协商的响应
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MerchantAction {
    Accept {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Reject {
        reason: String,
    },
    /// 反提案（选择平台给出的某个替代方案）
    Counter {
        alternative_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl MerchantAction {
    /// 响应成功后的协商状态
    pub fn resulting_status(&self) -> DisputeStatus {
        match self {
            MerchantAction::Accept { .. } => DisputeStatus::Accepted,
            MerchantAction::Reject { .. } => DisputeStatus::Rejected,
            MerchantAction::Counter { .. } => DisputeStatus::CounterProposed,
        }
    }

    pub fn note(&self) -> Option<String> {
        match self {
            MerchantAction::Accept { reason } => reason.clone(),
            MerchantAction::Reject { reason } => Some(reason.clone()),
            MerchantAction::Counter {
                alternative_id,
                reason,
                ..
            } => Some(match reason {
                Some(r) => format!("{alternative_id}: {r}"),
                None => alternative_id.clone(),
            }),
        }
    }
}
