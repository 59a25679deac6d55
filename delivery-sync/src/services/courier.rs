//! 骑手调度协作方
//!
//! 匹配与排序算法在外部服务中，这里只定义接口。

use crate::core::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::order::{Coordinates, CourierRef, Order};

/// 排序后的候选骑手
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourierCandidate {
    pub courier_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

impl CourierCandidate {
    pub fn new(courier_id: impl Into<String>) -> Self {
        Self {
            courier_id: courier_id.into(),
            distance_km: None,
        }
    }
}

#[async_trait]
pub trait CourierDispatcher: Send + Sync {
    /// 以门店坐标为中心排序候选骑手，`excluded` 中的骑手不得出现
    async fn rank_candidates(
        &self,
        origin: Option<&Coordinates>,
        excluded: &[String],
    ) -> Result<Vec<CourierCandidate>>;

    /// 释放订单上的骑手
    async fn release(&self, order: &Order, courier: &CourierRef) -> Result<()>;
}

/// 没有接入调度服务时使用：不返回候选，只记日志
pub struct LoggingCourierDispatcher;

#[async_trait]
impl CourierDispatcher for LoggingCourierDispatcher {
    async fn rank_candidates(
        &self,
        origin: Option<&Coordinates>,
        excluded: &[String],
    ) -> Result<Vec<CourierCandidate>> {
        tracing::info!(
            origin = ?origin,
            excluded = excluded.len(),
            "Courier search requested (no dispatcher configured)"
        );
        Ok(Vec::new())
    }

    async fn release(&self, order: &Order, courier: &CourierRef) -> Result<()> {
        tracing::info!(
            order_id = %order.id,
            courier_id = %courier.courier_id,
            "Courier released (no dispatcher configured)"
        );
        Ok(())
    }
}
