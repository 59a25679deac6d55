//! Marketplace API trait
//!
//! 同步核心只依赖该 trait，测试中用内存实现替换。

use crate::error::{MarketplaceError, MarketplaceResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::marketplace::{CancellationRequest, CourierAssignment, OrderDetail, PolledEvent};
use std::future::Future;

/// 协商反提案
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlternativeProposal {
    pub alternative_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// 平台 API
///
/// 所有订单动作按平台订单 ID 调用，对调用方幂等：平台容忍重复调用，
/// 本地只在对应的状态迁移上发起调用。
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    /// 拉取租户（门店）的待处理事件，可能为空
    async fn poll_events(
        &self,
        tenant_id: &str,
        merchant_id: &str,
    ) -> MarketplaceResult<Vec<PolledEvent>>;

    /// 确认已处理的事件，平台不再重复投递
    async fn acknowledge_events(&self, tenant_id: &str, event_ids: &[String])
    -> MarketplaceResult<()>;

    async fn fetch_order_detail(
        &self,
        tenant_id: &str,
        order_id: &str,
    ) -> MarketplaceResult<OrderDetail>;

    async fn confirm(&self, tenant_id: &str, order_id: &str) -> MarketplaceResult<()>;

    async fn dispatch(&self, tenant_id: &str, order_id: &str) -> MarketplaceResult<()>;

    async fn mark_ready_for_pickup(&self, tenant_id: &str, order_id: &str)
    -> MarketplaceResult<()>;

    async fn request_cancellation(
        &self,
        tenant_id: &str,
        order_id: &str,
        request: &CancellationRequest,
    ) -> MarketplaceResult<()>;

    async fn assign_courier(
        &self,
        tenant_id: &str,
        order_id: &str,
        assignment: &CourierAssignment,
    ) -> MarketplaceResult<()>;

    async fn accept_dispute(
        &self,
        tenant_id: &str,
        dispute_id: &str,
        reason: Option<&str>,
    ) -> MarketplaceResult<()>;

    async fn reject_dispute(
        &self,
        tenant_id: &str,
        dispute_id: &str,
        reason: &str,
    ) -> MarketplaceResult<()>;

    async fn propose_alternative(
        &self,
        tenant_id: &str,
        dispute_id: &str,
        proposal: &AlternativeProposal,
    ) -> MarketplaceResult<()>;
}

/// 401 后重试一次
///
/// 客户端在返回 `AuthExpired` 前已驱逐缓存令牌，第二次调用会触发刷新。
pub async fn with_auth_retry<T, F, Fut>(mut call: F) -> MarketplaceResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = MarketplaceResult<T>>,
{
    match call().await {
        Err(MarketplaceError::AuthExpired) => {
            tracing::debug!("Marketplace token expired, retrying once with a fresh token");
            call().await
        }
        other => other,
    }
}
