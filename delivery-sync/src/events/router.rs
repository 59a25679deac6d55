//! Event Router - 平台事件去重与分发
//!
//! 轮询和 Webhook 两条通道的事件都汇入这里：
//!
//! ```text
//! PolledEvent / WebhookEvent
//!        │  RemoteEvent::from_polled / from_webhook（边界校验）
//!        ▼
//!   EventRouter::route
//!        ├── Lifecycle(PLACED) ──► fetch_order_detail ──► OrderStateMachine::import_remote
//!        │                                                 └─► ScheduledActivationService::schedule
//!        ├── Lifecycle(其他)   ──► OrderStateMachine::apply_remote（取消时撤销激活）
//!        ├── DisputeOpened     ──► DisputeLedger::upsert_dispute
//!        ├── Settlement        ──► DisputeLedger::upsert_settlement
//!        └── Unrecognized      ──► warn 后丢弃
//! ```
//!
//! ## 批处理与确认
//!
//! 每个事件独立处理，单个失败不影响同批其他事件。成功、良性拒绝（重复 /
//! 终态 / 非法迁移）和永久无效的事件都会确认；可重试的失败不确认，交给平台重投。

use crate::core::{Result, SyncError};
use crate::disputes::DisputeLedger;
use crate::orders::{OrderStateMachine, SideEffect, TransitionOutcome, Trigger};
use crate::scheduling::{ScheduledActivation, ScheduledActivationService};
use crate::tenants::TenantRegistry;
use marketplace_client::{MarketplaceApi, with_auth_retry};
use shared::dispute::{Dispute, Settlement};
use shared::marketplace::{EventKind, LifecycleCode, PolledEvent, RemoteEvent, WebhookEvent};
use shared::order::{Order, OrderStatus};
use std::sync::Arc;

/// 单个事件的路由结果
#[derive(Debug, Clone)]
pub enum RouteOutcome {
    Imported {
        order: Order,
        activation: Option<ScheduledActivation>,
        effects: Vec<SideEffect>,
    },
    Transitioned(TransitionOutcome),
    DisputeOpened(Dispute),
    SettlementRecorded(Settlement),
    /// 不影响本地状态的事件（未识别 / 无对应迁移）
    Ignored { code: String },
}

/// 批量路由结果
#[derive(Debug, Default)]
pub struct BatchReport {
    pub routed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// 需要向平台确认的事件 ID（按到达顺序）
    pub ack_ids: Vec<String>,
    /// 第一个致命错误（凭证 / 存储），整批处理完后上报给轮询循环
    pub fatal: Option<SyncError>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.routed + self.skipped + self.failed
    }
}

pub struct EventRouter {
    orders: Arc<OrderStateMachine>,
    activations: Arc<ScheduledActivationService>,
    disputes: Arc<DisputeLedger>,
    api: Arc<dyn MarketplaceApi>,
    tenants: Arc<TenantRegistry>,
}

impl EventRouter {
    pub fn new(
        orders: Arc<OrderStateMachine>,
        activations: Arc<ScheduledActivationService>,
        disputes: Arc<DisputeLedger>,
        api: Arc<dyn MarketplaceApi>,
        tenants: Arc<TenantRegistry>,
    ) -> Self {
        Self {
            orders,
            activations,
            disputes,
            api,
            tenants,
        }
    }

    /// 路由单个事件
    pub async fn route(&self, event: RemoteEvent) -> Result<RouteOutcome> {
        match &event.kind {
            EventKind::Lifecycle { code } => self.route_lifecycle(&event, *code).await,
            EventKind::DisputeOpened { payload } => {
                let existing = self.orders.order_by_external_id(&event.order_id)?;
                let tenant_id = self.resolve_tenant(&event, existing.as_ref());
                self.disputes
                    .upsert_dispute(&event, payload, tenant_id)
                    .map(RouteOutcome::DisputeOpened)
            }
            EventKind::Settlement { payload } => self
                .disputes
                .upsert_settlement(&event, payload)
                .map(RouteOutcome::SettlementRecorded),
            EventKind::Unrecognized { code } => {
                tracing::warn!(
                    event_id = %event.event_id,
                    order_id = %event.order_id,
                    code = %code,
                    "Unrecognized marketplace event, discarding"
                );
                Ok(RouteOutcome::Ignored { code: code.clone() })
            }
        }
    }

    /// Webhook 推送入口（没有租户上下文）
    pub async fn route_webhook(&self, event: WebhookEvent) -> Result<RouteOutcome> {
        let event = RemoteEvent::from_webhook(event)
            .map_err(|e| SyncError::InvalidEvent(e.to_string()))?;
        let event_id = event.event_id.clone();
        let result = self.route(event).await;
        if let Err(e) = &result {
            log_failure(&event_id, e);
        }
        result
    }

    /// 路由一次轮询返回的事件（按数组顺序）
    pub async fn route_polled(&self, tenant_id: &str, events: Vec<PolledEvent>) -> BatchReport {
        let mut report = BatchReport::default();
        for polled in events {
            let event_id = polled.id.clone();
            let result = match RemoteEvent::from_polled(polled, Some(tenant_id.to_string())) {
                Ok(event) => self.route(event).await,
                Err(e) => Err(SyncError::InvalidEvent(e.to_string())),
            };
            record(&mut report, event_id, result);
        }
        report
    }

    /// 路由一批已解析的事件
    pub async fn route_batch(&self, events: Vec<RemoteEvent>) -> BatchReport {
        let mut report = BatchReport::default();
        for event in events {
            let event_id = event.event_id.clone();
            let result = self.route(event).await;
            record(&mut report, event_id, result);
        }
        report
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    async fn route_lifecycle(&self, event: &RemoteEvent, code: LifecycleCode) -> Result<RouteOutcome> {
        let existing = self.orders.order_by_external_id(&event.order_id)?;

        let order = match (code, existing) {
            (LifecycleCode::Placed, Some(_)) => {
                return Err(SyncError::DuplicateEvent {
                    event_id: event.event_id.clone(),
                });
            }
            (LifecycleCode::Placed, None) => return self.import(event).await,
            (_, None) => return Err(SyncError::OrderNotFound(event.order_id.clone())),
            (_, Some(order)) => order,
        };

        if let Some(tenant_id) = &event.tenant_id
            && tenant_id != &order.tenant_id
        {
            tracing::warn!(
                order_id = %order.id,
                event_tenant = %tenant_id,
                order_tenant = %order.tenant_id,
                "Event tenant differs from order tenant, using order tenant"
            );
        }

        if Trigger::from_lifecycle(code).is_none() {
            tracing::debug!(order_id = %order.id, code = %code, "Lifecycle event has no local transition");
            return Ok(RouteOutcome::Ignored {
                code: code.to_string(),
            });
        }

        let outcome = self
            .orders
            .apply_remote(&order, code, &event.event_id)
            .await?;
        if outcome.order.status == OrderStatus::Cancelled {
            self.activations.cancel(&outcome.order.id);
        }
        Ok(RouteOutcome::Transitioned(outcome))
    }

    /// PLACED：拉取订单详情并导入，预约单注册激活
    async fn import(&self, event: &RemoteEvent) -> Result<RouteOutcome> {
        let tenant_id = self
            .resolve_tenant(event, None)
            .ok_or_else(|| SyncError::UnresolvedTenant(event.order_id.clone()))?;

        let api = &self.api;
        let tenant = tenant_id.as_str();
        let external_id = event.order_id.as_str();
        let detail = with_auth_retry(move || api.fetch_order_detail(tenant, external_id)).await?;

        let imported = self
            .orders
            .import_remote(&tenant_id, &detail, &event.event_id)
            .await?;

        let mut order = imported.order;
        let activation = match (order.status, order.scheduled_at) {
            (OrderStatus::Scheduled, Some(fire_at)) => {
                let activation = self.activations.schedule(&order.id, fire_at).await?;
                // 已到期的预约单在 schedule 内同步激活
                if let Some(current) = self.orders.order(&order.id)? {
                    order = current;
                }
                Some(activation)
            }
            _ => None,
        };

        Ok(RouteOutcome::Imported {
            order,
            activation,
            effects: imported.effects,
        })
    }

    /// 租户解析：事件上下文 → 已有订单 → 商户索引
    fn resolve_tenant(&self, event: &RemoteEvent, order: Option<&Order>) -> Option<String> {
        event
            .tenant_id
            .clone()
            .or_else(|| order.map(|o| o.tenant_id.clone()))
            .or_else(|| {
                event
                    .merchant_id
                    .as_deref()
                    .and_then(|m| self.tenants.tenant_for_merchant(m))
            })
    }
}

/// 平台重投后可能成功的失败，不确认
fn should_redeliver(err: &SyncError) -> bool {
    err.is_retryable() || matches!(err, SyncError::OrderNotFound(_))
}

fn log_failure(event_id: &str, err: &SyncError) {
    if err.is_benign() {
        tracing::debug!(event_id = %event_id, reason = %err, "Event skipped");
    } else if should_redeliver(err) {
        tracing::warn!(event_id = %event_id, error = %err, "Event failed, awaiting redelivery");
    } else {
        tracing::error!(event_id = %event_id, error = %err, "Event failed permanently, discarding");
    }
}

fn record(report: &mut BatchReport, event_id: String, result: Result<RouteOutcome>) {
    match result {
        Ok(_) => {
            report.routed += 1;
            report.ack_ids.push(event_id);
        }
        Err(e) => {
            log_failure(&event_id, &e);
            if e.is_benign() {
                report.skipped += 1;
                report.ack_ids.push(event_id);
                return;
            }
            report.failed += 1;
            if !should_redeliver(&e) {
                report.ack_ids.push(event_id);
            }
            if e.is_fatal() && report.fatal.is_none() {
                report.fatal = Some(e);
            }
        }
    }
}
