//! 平台 HTTP 接口的报文结构
//!
//! 字段命名与平台保持一致（camelCase），只保留同步核心用到的字段。

use crate::order::{Coordinates, DeliveryMode, OrderTiming};
use crate::util::parse_rfc3339_millis;
use serde::{Deserialize, Serialize};

/// 凭证交换响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub r#type: Option<String>,
    /// 有效期（秒）
    pub expires_in: u64,
}

/// 轮询接口返回的单个事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolledEvent {
    pub id: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_code: Option<String>,
    pub order_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// 事件确认请求体元素
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventAck {
    pub id: String,
}

/// Webhook 推送的事件（外部入口只保证 fullCode + orderId）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub full_code: String,
    pub order_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

// ============================================================================
// Order Detail
// ============================================================================

/// 平台订单类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    #[default]
    Delivery,
    Takeout,
    DineIn,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderSchedule {
    pub delivery_date_time_start: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_date_time_end: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MerchantRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
}

/// 订单详情（`GET /orders/{id}`）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_id: Option<String>,
    #[serde(default)]
    pub order_type: OrderType,
    #[serde(default)]
    pub order_timing: OrderTiming,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<OrderSchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant: Option<MerchantRef>,
}

impl OrderDetail {
    /// 非 DELIVERY 订单都按到店自取处理
    pub fn delivery_mode(&self) -> DeliveryMode {
        match self.order_type {
            OrderType::Delivery => DeliveryMode::Delivery,
            _ => DeliveryMode::Pickup,
        }
    }

    /// 预约开始时间 (Unix millis)，即时单返回 None
    pub fn scheduled_at(&self) -> Option<i64> {
        if self.order_timing != OrderTiming::Scheduled {
            return None;
        }
        self.schedule
            .as_ref()
            .and_then(|s| parse_rfc3339_millis(&s.delivery_date_time_start))
    }

    pub fn origin(&self) -> Option<Coordinates> {
        self.merchant.as_ref().and_then(|m| m.coordinates)
    }
}

// ============================================================================
// Order Actions
// ============================================================================

/// 取消请求
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CancellationRequest {
    pub reason: String,
    pub cancellation_code: String,
}

/// 骑手分配（自配送）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CourierAssignment {
    pub worker_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_phone: Option<String>,
}
