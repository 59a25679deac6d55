//! 远端事件 - 轮询与 Webhook 两个来源统一后的形态
//!
//! 平台事件原本是同一个松散结构（code + orderId + metadata），这里在边界处
//! 解析成带标签的枚举，下游只处理已校验的类型。

use super::wire::{PolledEvent, WebhookEvent};
use crate::util::{now_millis, parse_rfc3339_millis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Lifecycle Codes
// ============================================================================

/// 订单生命周期事件码
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleCode {
    Placed,
    Confirmed,
    SeparationStarted,
    SeparationEnded,
    ReadyToPickup,
    Dispatched,
    Concluded,
    CancellationRequested,
    Cancelled,
}

impl LifecycleCode {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleCode::Placed => "PLACED",
            LifecycleCode::Confirmed => "CONFIRMED",
            LifecycleCode::SeparationStarted => "SEPARATION_STARTED",
            LifecycleCode::SeparationEnded => "SEPARATION_ENDED",
            LifecycleCode::ReadyToPickup => "READY_TO_PICKUP",
            LifecycleCode::Dispatched => "DISPATCHED",
            LifecycleCode::Concluded => "CONCLUDED",
            LifecycleCode::CancellationRequested => "CANCELLATION_REQUESTED",
            LifecycleCode::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for LifecycleCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 事件码分类（生命周期 / 协商 / 结算）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCode {
    Lifecycle(LifecycleCode),
    Dispute,
    Settlement,
}

impl FromStr for EventCode {
    type Err = ();

    /// 同时接受完整码和三字母短码
    fn from_str(code: &str) -> Result<Self, Self::Err> {
        let code = match code.trim().to_ascii_uppercase().as_str() {
            "PLACED" | "PLC" => EventCode::Lifecycle(LifecycleCode::Placed),
            "CONFIRMED" | "CFM" => EventCode::Lifecycle(LifecycleCode::Confirmed),
            "SEPARATION_STARTED" | "SPS" => {
                EventCode::Lifecycle(LifecycleCode::SeparationStarted)
            }
            "SEPARATION_ENDED" | "SPE" => EventCode::Lifecycle(LifecycleCode::SeparationEnded),
            "READY_TO_PICKUP" | "RTP" => EventCode::Lifecycle(LifecycleCode::ReadyToPickup),
            "DISPATCHED" | "DSP" => EventCode::Lifecycle(LifecycleCode::Dispatched),
            "CONCLUDED" | "CON" => EventCode::Lifecycle(LifecycleCode::Concluded),
            "CANCELLATION_REQUESTED" | "CAR" => {
                EventCode::Lifecycle(LifecycleCode::CancellationRequested)
            }
            "CANCELLED" | "CAN" => EventCode::Lifecycle(LifecycleCode::Cancelled),
            "HANDSHAKE_DISPUTE" | "HSD" => EventCode::Dispute,
            "HANDSHAKE_SETTLEMENT" | "HSS" => EventCode::Settlement,
            _ => return Err(()),
        };
        Ok(code)
    }
}

// ============================================================================
// Negotiation Payloads
// ============================================================================

/// 协商（争议）开启事件的 metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DisputePayload {
    pub dispute_id: String,
    #[serde(default = "default_dispute_type", alias = "handshakeType")]
    pub dispute_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// 平台给出的响应截止时间（ISO-8601）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<serde_json::Value>,
}

fn default_dispute_type() -> String {
    "UNKNOWN".to_string()
}

impl DisputePayload {
    pub fn expires_at_millis(&self) -> Option<i64> {
        self.expires_at.as_deref().and_then(parse_rfc3339_millis)
    }
}

/// 结算事件的 metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SettlementPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispute_id: Option<String>,
    #[serde(alias = "status")]
    pub result: String,
    /// 其余决策信息原样保留
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<serde_json::Value>,
}

// ============================================================================
// Remote Event
// ============================================================================

/// 事件类型（带标签）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    Lifecycle { code: LifecycleCode },
    DisputeOpened { payload: DisputePayload },
    Settlement { payload: SettlementPayload },
    /// 未识别的事件码，路由时记录并丢弃
    Unrecognized { code: String },
}

/// 事件来源
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Polling,
    Webhook,
}

/// 远端事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteEvent {
    /// 去重键
    pub event_id: String,
    /// 平台订单 ID
    pub order_id: String,
    /// 租户上下文（Webhook 冷启动路径下为空）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_id: Option<String>,
    pub kind: EventKind,
    pub source: EventSource,
    /// 平台侧事件时间 (Unix millis)
    pub occurred_at: i64,
}

/// 事件解析错误
#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("Event {event_id} ({code}) has invalid metadata: {reason}")]
    InvalidPayload {
        event_id: String,
        code: String,
        reason: String,
    },
}

impl RemoteEvent {
    /// 轮询事件 → RemoteEvent
    pub fn from_polled(
        event: PolledEvent,
        tenant_id: Option<String>,
    ) -> Result<Self, EventParseError> {
        let code = event.full_code.clone().unwrap_or_else(|| event.code.clone());
        let occurred_at = event
            .created_at
            .as_deref()
            .and_then(parse_rfc3339_millis)
            .unwrap_or_else(now_millis);
        let kind = classify(&event.id, &code, event.metadata)?;

        Ok(Self {
            event_id: event.id,
            order_id: event.order_id,
            tenant_id,
            merchant_id: event.merchant_id,
            kind,
            source: EventSource::Polling,
            occurred_at,
        })
    }

    /// Webhook 事件 → RemoteEvent
    ///
    /// 推送没有事件 ID 时按 `(orderId, fullCode)` 合成：生命周期事件本身靠状态
    /// 等值去重，合成 ID 只用于日志关联。
    pub fn from_webhook(event: WebhookEvent) -> Result<Self, EventParseError> {
        let event_id = event
            .id
            .clone()
            .unwrap_or_else(|| format!("webhook:{}:{}", event.order_id, event.full_code));
        let kind = classify(&event_id, &event.full_code, event.metadata)?;

        Ok(Self {
            event_id,
            order_id: event.order_id,
            tenant_id: None,
            merchant_id: event.merchant_id,
            kind,
            source: EventSource::Webhook,
            occurred_at: now_millis(),
        })
    }

    /// 事件码（日志用）
    pub fn code(&self) -> String {
        match &self.kind {
            EventKind::Lifecycle { code } => code.to_string(),
            EventKind::DisputeOpened { .. } => "HANDSHAKE_DISPUTE".to_string(),
            EventKind::Settlement { .. } => "HANDSHAKE_SETTLEMENT".to_string(),
            EventKind::Unrecognized { code } => code.clone(),
        }
    }
}

fn classify(
    event_id: &str,
    code: &str,
    metadata: Option<serde_json::Value>,
) -> Result<EventKind, EventParseError> {
    let invalid = |reason: String| EventParseError::InvalidPayload {
        event_id: event_id.to_string(),
        code: code.to_string(),
        reason,
    };

    match code.parse::<EventCode>() {
        Ok(EventCode::Lifecycle(code)) => Ok(EventKind::Lifecycle { code }),
        Ok(EventCode::Dispute) => {
            let metadata = metadata.ok_or_else(|| invalid("missing metadata".into()))?;
            let payload: DisputePayload =
                serde_json::from_value(metadata).map_err(|e| invalid(e.to_string()))?;
            Ok(EventKind::DisputeOpened { payload })
        }
        Ok(EventCode::Settlement) => {
            let metadata = metadata.ok_or_else(|| invalid("missing metadata".into()))?;
            let mut payload: SettlementPayload =
                serde_json::from_value(metadata.clone()).map_err(|e| invalid(e.to_string()))?;
            if payload.decision.is_none() {
                payload.decision = Some(metadata);
            }
            Ok(EventKind::Settlement { payload })
        }
        Err(()) => Ok(EventKind::Unrecognized {
            code: code.to_string(),
        }),
    }
}
