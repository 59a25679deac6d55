//! 外卖订单基础类型

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Order Status
// ============================================================================

/// 本地订单状态
///
/// ```text
/// scheduled ──► pending ──► preparing ──┬──► ready_for_pickup ──┐
///                                       └──► out_for_delivery ──┴──► delivered
///
/// (任意非终态) ──► cancelled
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// 预约单，等待激活
    Scheduled,
    /// 已导入，等待平台确认
    Pending,
    /// 制作中
    Preparing,
    /// 待自取 / 待骑手取餐
    ReadyForPickup,
    /// 配送中
    OutForDelivery,
    /// 已送达（终态）
    Delivered,
    /// 已取消（终态）
    Cancelled,
}

impl OrderStatus {
    /// 终态订单不再接受任何迁移
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Scheduled => "scheduled",
            OrderStatus::Pending => "pending",
            OrderStatus::Preparing => "preparing",
            OrderStatus::ReadyForPickup => "ready_for_pickup",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Delivery Mode / Timing
// ============================================================================

/// 履约方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// 门店自派骑手配送
    #[default]
    Delivery,
    /// 顾客到店自取
    Pickup,
}

/// 下单时效
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderTiming {
    #[default]
    Immediate,
    Scheduled,
}

// ============================================================================
// Courier
// ============================================================================

/// 经纬度
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// 已分配骑手
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CourierRef {
    pub courier_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl CourierRef {
    pub fn new(courier_id: impl Into<String>) -> Self {
        Self {
            courier_id: courier_id.into(),
            name: None,
            phone: None,
        }
    }
}
