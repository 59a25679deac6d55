//! OrderStateMachine - 订单状态迁移与副作用
//!
//! 所有状态写入都是条件更新（"仅当当前状态 = Y 时写入 X"），并发的两个迁移
//! 只有一个生效，另一个按胜者造成的状态被拒绝。
//!
//! ```text
//! import_remote / apply_remote / activate_scheduled / assign_courier
//!     ├─ 1. 读取当前订单
//!     ├─ 2. transitions::next_status 计算目标状态（拒绝 → SyncError）
//!     ├─ 3. storage.update_status_if(expected = 当前状态)
//!     │      └─ 不匹配 → 用最新状态重新计算
//!     └─ 4. 执行副作用（骑手搜索 / 门店通知 / 回写平台）
//! ```
//!
//! 回写平台失败不回滚本地迁移，只记录 `reflect_failed`。

use crate::core::{Result, SyncError};
use crate::orders::transitions::{Rejection, Trigger, next_status};
use crate::services::{CourierDispatcher, Notification, Notifier};
use crate::storage::{ConditionalUpdate, SyncStorage};
use marketplace_client::{MarketplaceApi, MarketplaceResult, with_auth_retry};
use shared::marketplace::{CancellationRequest, CourierAssignment, LifecycleCode, OrderDetail};
use shared::order::{CourierRef, Order, OrderStatus};
use shared::util::now_millis;
use std::future::Future;
use std::sync::Arc;

/// 条件更新最多重试次数（每次都基于最新状态重新计算）
const MAX_ATTEMPTS: usize = 3;

/// 迁移附带的副作用
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// 已向候选骑手发出邀约
    CourierSearch { candidates: usize },
    StoreNotified,
    CourierReleased { courier_id: String },
    MarketplaceConfirmed,
    MarketplaceDispatched,
    /// 到店自取单已在平台标记为待取
    MarketplaceReadyForPickup,
}

/// 导入结果
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub order: Order,
    pub effects: Vec<SideEffect>,
}

/// 迁移结果
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub order: Order,
    pub previous: OrderStatus,
    pub trigger: Trigger,
    pub effects: Vec<SideEffect>,
    /// 回写平台失败（本地迁移仍然生效）
    pub reflect_failed: bool,
}

impl TransitionOutcome {
    fn new(order: Order, previous: OrderStatus, trigger: Trigger) -> Self {
        Self {
            order,
            previous,
            trigger,
            effects: Vec::new(),
            reflect_failed: false,
        }
    }
}

pub struct OrderStateMachine {
    storage: SyncStorage,
    api: Arc<dyn MarketplaceApi>,
    couriers: Arc<dyn CourierDispatcher>,
    notifier: Arc<dyn Notifier>,
}

impl OrderStateMachine {
    pub fn new(
        storage: SyncStorage,
        api: Arc<dyn MarketplaceApi>,
        couriers: Arc<dyn CourierDispatcher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            storage,
            api,
            couriers,
            notifier,
        }
    }

    pub fn order(&self, order_id: &str) -> Result<Option<Order>> {
        Ok(self.storage.get_order(order_id)?)
    }

    pub fn order_by_external_id(&self, external_id: &str) -> Result<Option<Order>> {
        Ok(self.storage.find_by_external_id(external_id)?)
    }

    // ========================================================================
    // Remote → Local
    // ========================================================================

    /// 首次导入平台订单（PLACED）
    ///
    /// 预约单进入 `scheduled`，由调用方注册激活；即时单进入 `pending`。
    pub async fn import_remote(
        &self,
        tenant_id: &str,
        detail: &OrderDetail,
        event_id: &str,
    ) -> Result<ImportOutcome> {
        if self.storage.find_by_external_id(&detail.id)?.is_some() {
            return Err(SyncError::DuplicateEvent {
                event_id: event_id.to_string(),
            });
        }

        let is_scheduled = detail.order_timing == shared::order::OrderTiming::Scheduled;
        let scheduled_at = detail.scheduled_at();
        if is_scheduled && scheduled_at.is_none() {
            return Err(SyncError::InvalidEvent(format!(
                "scheduled order {} has no delivery window",
                detail.id
            )));
        }

        let now = now_millis();
        let order = Order {
            id: uuid::Uuid::new_v4().to_string(),
            external_id: detail.id.clone(),
            tenant_id: tenant_id.to_string(),
            status: if is_scheduled {
                OrderStatus::Scheduled
            } else {
                OrderStatus::Pending
            },
            delivery_mode: detail.delivery_mode(),
            is_scheduled,
            scheduled_at,
            origin: detail.origin(),
            courier: None,
            courier_blacklist: Vec::new(),
            display_id: detail.display_id.clone(),
            created_at: now,
            updated_at: now,
        };

        // 并发导入同一订单时只有一个写入成功
        if !self.storage.insert_order(&order)? {
            return Err(SyncError::DuplicateEvent {
                event_id: event_id.to_string(),
            });
        }
        tracing::info!(
            order_id = %order.id,
            external_id = %order.external_id,
            tenant_id = %tenant_id,
            status = %order.status,
            mode = ?order.delivery_mode,
            "Imported marketplace order"
        );

        let mut effects = Vec::new();
        if !is_scheduled {
            self.notify_store(&order, format!("New order {}", order.label()))
                .await;
            effects.push(SideEffect::StoreNotified);
            if !order.is_pickup() {
                effects.push(self.search_courier(&order).await);
            }
        }

        Ok(ImportOutcome { order, effects })
    }

    /// 平台生命周期事件
    pub async fn apply_remote(
        &self,
        order: &Order,
        code: LifecycleCode,
        event_id: &str,
    ) -> Result<TransitionOutcome> {
        let Some(trigger) = Trigger::from_lifecycle(code) else {
            return match code {
                LifecycleCode::Placed => Err(SyncError::DuplicateEvent {
                    event_id: event_id.to_string(),
                }),
                _ => Err(SyncError::InvalidTransition {
                    order_id: order.id.clone(),
                    from: order.status,
                    trigger: code.to_string(),
                }),
            };
        };

        if trigger == Trigger::Cancelled {
            return self.cancel(&order.id, event_id).await;
        }

        let (updated, previous) = self.transition(&order.id, trigger, event_id, |_| {})?;
        let mut outcome = TransitionOutcome::new(updated, previous, trigger);
        let order = &outcome.order;

        match trigger {
            Trigger::Confirmed if order.is_pickup() => {
                self.notify_store(order, format!("Prepare order {} for pickup", order.label()))
                    .await;
                outcome.effects.push(SideEffect::StoreNotified);
                self.mark_ready_for_pickup(&mut outcome).await;
            }
            Trigger::Confirmed | Trigger::SeparationEnded
                if !order.is_pickup() && order.courier.is_none() =>
            {
                let effect = self.search_courier(order).await;
                outcome.effects.push(effect);
            }
            _ => {}
        }

        tracing::info!(
            order_id = %outcome.order.id,
            from = %previous,
            to = %outcome.order.status,
            trigger = %trigger,
            "Order transitioned"
        );
        Ok(outcome)
    }

    /// 取消：释放骑手并拉黑，通知门店
    async fn cancel(&self, order_id: &str, event_id: &str) -> Result<TransitionOutcome> {
        let mut released: Option<CourierRef> = None;
        let (order, previous) =
            self.transition(order_id, Trigger::Cancelled, event_id, |o: &mut Order| {
                // 取消是终态：名单随订单保存为释放记录，不再影响本单派单。
                // 活跃订单的派单在 search_courier 中排除名单内骑手。
                if let Some(courier) = o.courier.take() {
                    if !o.courier_blacklist.contains(&courier.courier_id) {
                        o.courier_blacklist.push(courier.courier_id.clone());
                    }
                    released = Some(courier);
                }
            })?;
        let mut outcome = TransitionOutcome::new(order, previous, Trigger::Cancelled);

        if let Some(courier) = released {
            if let Err(e) = self.couriers.release(&outcome.order, &courier).await {
                tracing::warn!(
                    order_id = %outcome.order.id,
                    courier_id = %courier.courier_id,
                    error = %e,
                    "Failed to release courier"
                );
            }
            outcome.effects.push(SideEffect::CourierReleased {
                courier_id: courier.courier_id,
            });
        }

        self.notify_store(
            &outcome.order,
            format!("Order {} was cancelled", outcome.order.label()),
        )
        .await;
        outcome.effects.push(SideEffect::StoreNotified);

        tracing::info!(order_id = %order_id, from = %previous, "Order cancelled");
        Ok(outcome)
    }

    // ========================================================================
    // Scheduled activation
    // ========================================================================

    /// 预约单到点：scheduled → preparing，并向平台确认
    pub async fn activate_scheduled(&self, order_id: &str) -> Result<TransitionOutcome> {
        let (order, previous) = self.transition(order_id, Trigger::Activation, "activation", |_| {})?;
        let mut outcome = TransitionOutcome::new(order, previous, Trigger::Activation);

        let api = &self.api;
        let tenant_id = outcome.order.tenant_id.as_str();
        let external_id = outcome.order.external_id.as_str();
        if self
            .reflect(&outcome.order, "confirm", move || api.confirm(tenant_id, external_id))
            .await
        {
            outcome.effects.push(SideEffect::MarketplaceConfirmed);
        } else {
            outcome.reflect_failed = true;
        }

        if outcome.order.is_pickup() {
            self.notify_store(
                &outcome.order,
                format!("Prepare scheduled order {} for pickup", outcome.order.label()),
            )
            .await;
            outcome.effects.push(SideEffect::StoreNotified);
            self.mark_ready_for_pickup(&mut outcome).await;
        } else {
            let effect = self.search_courier(&outcome.order).await;
            outcome.effects.push(effect);
        }

        tracing::info!(order_id = %order_id, "Scheduled order activated");
        Ok(outcome)
    }

    // ========================================================================
    // Local → Remote
    // ========================================================================

    /// 本地指派骑手：preparing / ready_for_pickup → out_for_delivery
    pub async fn assign_courier(
        &self,
        order_id: &str,
        courier: CourierRef,
    ) -> Result<TransitionOutcome> {
        let assigned = courier.clone();
        let (order, previous) =
            self.transition(order_id, Trigger::CourierAssigned, "assign_courier", move |o: &mut Order| {
                o.courier = Some(assigned.clone());
            })?;
        let mut outcome = TransitionOutcome::new(order, previous, Trigger::CourierAssigned);

        let api = &self.api;
        let tenant_id = outcome.order.tenant_id.as_str();
        let external_id = outcome.order.external_id.as_str();
        let assignment = CourierAssignment {
            worker_id: courier.courier_id.clone(),
            worker_name: courier.name.clone(),
            worker_phone: courier.phone.clone(),
        };
        let assignment = &assignment;

        let pushed = self
            .reflect(&outcome.order, "assign_courier", move || {
                api.assign_courier(tenant_id, external_id, assignment)
            })
            .await
            && self
                .reflect(&outcome.order, "dispatch", move || {
                    api.dispatch(tenant_id, external_id)
                })
                .await;
        if pushed {
            outcome.effects.push(SideEffect::MarketplaceDispatched);
        } else {
            outcome.reflect_failed = true;
        }

        tracing::info!(
            order_id = %order_id,
            courier_id = %courier.courier_id,
            "Courier assigned"
        );
        Ok(outcome)
    }

    /// 向平台发起取消请求，本地状态等平台的取消事件到达后再变更
    pub async fn request_cancellation(
        &self,
        order_id: &str,
        reason: &str,
        cancellation_code: &str,
    ) -> Result<()> {
        let order = self
            .storage
            .get_order(order_id)?
            .ok_or_else(|| SyncError::OrderNotFound(order_id.to_string()))?;
        if order.status.is_terminal() {
            return Err(SyncError::OrderAlreadyTerminal {
                order_id: order.id,
                status: order.status,
            });
        }

        let request = CancellationRequest {
            reason: reason.to_string(),
            cancellation_code: cancellation_code.to_string(),
        };
        let api = &self.api;
        let request = &request;
        let tenant_id = order.tenant_id.as_str();
        let external_id = order.external_id.as_str();
        with_auth_retry(move || api.request_cancellation(tenant_id, external_id, request)).await?;

        tracing::info!(order_id = %order_id, code = %cancellation_code, "Cancellation requested");
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// 条件迁移，返回 (更新后的订单, 迁移前状态)
    fn transition(
        &self,
        order_id: &str,
        trigger: Trigger,
        event_id: &str,
        mut patch: impl FnMut(&mut Order),
    ) -> Result<(Order, OrderStatus)> {
        let mut current = self
            .storage
            .get_order(order_id)?
            .ok_or_else(|| SyncError::OrderNotFound(order_id.to_string()))?;

        for _ in 0..MAX_ATTEMPTS {
            let next = next_status(current.status, trigger, current.delivery_mode)
                .map_err(|r| rejection_error(r, &current, trigger, event_id))?;

            match self.storage.update_status_if(
                order_id,
                &[current.status],
                next,
                now_millis(),
                &mut patch,
            )? {
                ConditionalUpdate::Applied(order) => return Ok((order, current.status)),
                ConditionalUpdate::Mismatch(order) => {
                    tracing::debug!(
                        order_id = %order_id,
                        expected = %current.status,
                        actual = %order.status,
                        "Order changed concurrently, re-evaluating"
                    );
                    current = order;
                }
                ConditionalUpdate::NotFound => {
                    return Err(SyncError::OrderNotFound(order_id.to_string()));
                }
            }
        }

        Err(SyncError::InvalidTransition {
            order_id: order_id.to_string(),
            from: current.status,
            trigger: trigger.to_string(),
        })
    }

    /// 按门店坐标搜索骑手并逐个发出邀约
    async fn search_courier(&self, order: &Order) -> SideEffect {
        let ranked = match self
            .couriers
            .rank_candidates(order.origin.as_ref(), &order.courier_blacklist)
            .await
        {
            Ok(ranked) => ranked,
            Err(e) => {
                tracing::warn!(order_id = %order.id, error = %e, "Courier search failed");
                Vec::new()
            }
        };

        let mut offered = 0;
        for candidate in ranked
            .iter()
            .filter(|c| !order.courier_blacklist.contains(&c.courier_id))
        {
            self.notifier
                .notify(Notification::courier(
                    &candidate.courier_id,
                    &order.id,
                    format!("New delivery offer for order {}", order.label()),
                ))
                .await;
            offered += 1;
        }

        tracing::debug!(order_id = %order.id, candidates = offered, "Courier search dispatched");
        SideEffect::CourierSearch { candidates: offered }
    }

    /// 自取单：在平台标记待取（失败只记 reflect_failed）
    async fn mark_ready_for_pickup(&self, outcome: &mut TransitionOutcome) {
        let api = &self.api;
        let tenant_id = outcome.order.tenant_id.as_str();
        let external_id = outcome.order.external_id.as_str();
        let marked = self
            .reflect(&outcome.order, "mark_ready_for_pickup", move || {
                api.mark_ready_for_pickup(tenant_id, external_id)
            })
            .await;
        if marked {
            outcome.effects.push(SideEffect::MarketplaceReadyForPickup);
        } else {
            outcome.reflect_failed = true;
        }
    }

    async fn notify_store(&self, order: &Order, message: String) {
        self.notifier
            .notify(Notification::store(&order.tenant_id, &order.id, message))
            .await;
    }

    /// 回写平台（401 重试一次），失败只记 warn
    async fn reflect<F, Fut>(&self, order: &Order, action: &'static str, call: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = MarketplaceResult<()>>,
    {
        match with_auth_retry(call).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    order_id = %order.id,
                    external_id = %order.external_id,
                    action = action,
                    error = %e,
                    "Failed to reflect order change to marketplace"
                );
                false
            }
        }
    }
}

fn rejection_error(
    rejection: Rejection,
    order: &Order,
    trigger: Trigger,
    event_id: &str,
) -> SyncError {
    match rejection {
        Rejection::AlreadyTerminal => SyncError::OrderAlreadyTerminal {
            order_id: order.id.clone(),
            status: order.status,
        },
        Rejection::Duplicate => SyncError::DuplicateEvent {
            event_id: event_id.to_string(),
        },
        Rejection::ScheduleRace => SyncError::ScheduleRace {
            order_id: order.id.clone(),
            status: order.status,
        },
        Rejection::Invalid => SyncError::InvalidTransition {
            order_id: order.id.clone(),
            from: order.status,
            trigger: trigger.to_string(),
        },
    }
}

trait OrderLabel {
    fn label(&self) -> &str;
}

impl OrderLabel for Order {
    /// 展示号优先，便于门店识别
    fn label(&self) -> &str {
        self.display_id.as_deref().unwrap_or(&self.external_id)
    }
}

#[cfg(test)]
mod tests;
