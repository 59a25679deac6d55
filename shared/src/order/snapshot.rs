//! Order record as persisted by the sync core

use super::types::{Coordinates, CourierRef, DeliveryMode, OrderStatus};
use serde::{Deserialize, Serialize};

/// 本地订单
///
/// 首次从平台导入时创建；状态只由状态机修改；永不删除，只会进入终态。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    /// 本地订单 ID
    pub id: String,
    /// 平台订单 ID
    pub external_id: String,
    /// 所属租户（门店）
    pub tenant_id: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub delivery_mode: DeliveryMode,
    #[serde(default)]
    pub is_scheduled: bool,
    /// 预约激活时间 (Unix millis)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<i64>,
    /// 取餐点坐标（骑手搜索的起点）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Coordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub courier: Option<CourierRef>,
    /// 取消后被释放的骑手，重新派单时跳过
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub courier_blacklist: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Order {
    pub fn is_pickup(&self) -> bool {
        self.delivery_mode == DeliveryMode::Pickup
    }
}
