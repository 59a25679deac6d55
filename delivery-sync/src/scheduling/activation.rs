//! 预约订单激活
//!
//! 每个预约订单一个一次性定时任务，到点调用
//! [`OrderStateMachine::activate_scheduled`]。进程重启或定时器丢失时由补偿
//! 扫描兜底：
//!
//! ```text
//! run_sweeper
//!     ├─ 1. 启动：为未来的预约单重新注册定时器
//!     ├─ 2. 启动：立即补扫一次
//!     └─ 3. 周期补扫（默认 5 分钟）
//! ```
//!
//! 激活本身由状态机的条件更新保护，定时器和补扫同时触发也只会生效一次。

use crate::core::Result;
use crate::orders::OrderStateMachine;
use crate::storage::SyncStorage;
use dashmap::DashMap;
use serde::Serialize;
use shared::order::OrderStatus;
use shared::util::now_millis;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 激活状态
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    Pending,
    Fired,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScheduledActivation {
    pub order_id: String,
    /// 触发时间 (Unix millis)
    pub fire_at: i64,
    pub state: ActivationState,
}

struct PendingTimer {
    fire_at: i64,
    generation: u64,
    cancel: CancellationToken,
}

/// 补扫结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub activated: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct ScheduledActivationService {
    storage: SyncStorage,
    orders: Arc<OrderStateMachine>,
    timers: Arc<DashMap<String, PendingTimer>>,
    generation: AtomicU64,
    sweep_interval: Duration,
    sweep_window: Duration,
}

impl ScheduledActivationService {
    pub fn new(
        storage: SyncStorage,
        orders: Arc<OrderStateMachine>,
        sweep_interval: Duration,
        sweep_window: Duration,
    ) -> Self {
        Self {
            storage,
            orders,
            timers: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
            sweep_interval,
            sweep_window,
        }
    }

    /// 注册激活；已到期则立即触发
    ///
    /// 同一订单重复注册时替换旧的定时器。
    pub async fn schedule(&self, order_id: &str, fire_at: i64) -> Result<ScheduledActivation> {
        self.cancel_timer(order_id);

        let now = now_millis();
        if fire_at <= now {
            tracing::info!(order_id = %order_id, overdue_ms = now - fire_at, "Scheduled order already due, firing now");
            self.fire(order_id).await?;
            return Ok(ScheduledActivation {
                order_id: order_id.to_string(),
                fire_at,
                state: ActivationState::Fired,
            });
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        self.timers.insert(
            order_id.to_string(),
            PendingTimer {
                fire_at,
                generation,
                cancel: cancel.clone(),
            },
        );

        let delay = Duration::from_millis((fire_at - now) as u64);
        let timers = self.timers.clone();
        let orders = self.orders.clone();
        let id = order_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(order_id = %id, "Scheduled activation cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    timers.remove_if(&id, |_, t| t.generation == generation);
                    log_activation(&id, orders.activate_scheduled(&id).await.map(|_| ()));
                }
            }
        });

        tracing::debug!(order_id = %order_id, fire_at = fire_at, "Scheduled activation registered");
        Ok(ScheduledActivation {
            order_id: order_id.to_string(),
            fire_at,
            state: ActivationState::Pending,
        })
    }

    /// 取消未触发的激活（已触发则返回 false）
    pub fn cancel(&self, order_id: &str) -> bool {
        let cancelled = self.cancel_timer(order_id);
        if cancelled {
            tracing::debug!(order_id = %order_id, "Pending activation cancelled");
        }
        cancelled
    }

    pub fn pending(&self, order_id: &str) -> Option<ScheduledActivation> {
        self.timers.get(order_id).map(|t| ScheduledActivation {
            order_id: order_id.to_string(),
            fire_at: t.fire_at,
            state: ActivationState::Pending,
        })
    }

    pub fn pending_count(&self) -> usize {
        self.timers.len()
    }

    fn cancel_timer(&self, order_id: &str) -> bool {
        match self.timers.remove(order_id) {
            Some((_, timer)) => {
                timer.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// 触发一次激活；良性竞争视为成功
    async fn fire(&self, order_id: &str) -> Result<bool> {
        match self.orders.activate_scheduled(order_id).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_benign() => {
                log_activation(order_id, Err(e));
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // Sweep
    // ========================================================================

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(now_millis()).await
    }

    /// 补扫 `[now - window, now]` 内到期仍处于 scheduled 的订单
    pub async fn sweep_at(&self, now: i64) -> Result<SweepReport> {
        let from = now - self.sweep_window.as_millis() as i64;
        let due = self.storage.scheduled_orders_due(from, now)?;

        let mut report = SweepReport {
            scanned: due.len(),
            ..Default::default()
        };
        for order in due {
            // 读取后状态可能已变化，由条件更新裁决（ScheduleRace 计为 skipped）
            self.cancel_timer(&order.id);
            match self.fire(&order.id).await {
                Ok(true) => report.activated += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    tracing::error!(order_id = %order.id, error = %e, "Sweep failed to activate order");
                    report.failed += 1;
                }
            }
        }

        if report.scanned > 0 {
            tracing::info!(
                scanned = report.scanned,
                activated = report.activated,
                skipped = report.skipped,
                failed = report.failed,
                "Scheduled order sweep finished"
            );
        }
        Ok(report)
    }

    /// 为尚未到期的预约单重新注册定时器（进程重启后）
    pub async fn restore_timers(&self) -> Result<usize> {
        let now = now_millis();
        let mut restored = 0;
        for order in self.storage.active_orders()? {
            if order.status != OrderStatus::Scheduled || self.timers.contains_key(&order.id) {
                continue;
            }
            if let Some(at) = order.scheduled_at
                && at > now
            {
                self.schedule(&order.id, at).await?;
                restored += 1;
            }
        }
        if restored > 0 {
            tracing::info!(restored = restored, "Restored scheduled activation timers");
        }
        Ok(restored)
    }

    /// 主循环：恢复定时器 → 启动补扫 → 周期补扫
    pub async fn run_sweeper(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!(interval_secs = self.sweep_interval.as_secs(), "Scheduled activation sweeper started");

        if let Err(e) = self.restore_timers().await {
            tracing::error!(error = %e, "Failed to restore scheduled activation timers");
        }

        let mut interval = tokio::time::interval(self.sweep_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                // 第一次 tick 立即返回，即启动补扫
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "Scheduled order sweep failed");
                    }
                }
            }
        }

        for entry in self.timers.iter() {
            entry.cancel.cancel();
        }
        tracing::info!("Scheduled activation sweeper stopped");
    }
}

fn log_activation(order_id: &str, result: Result<()>) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_benign() => {
            tracing::debug!(order_id = %order_id, reason = %e, "Activation skipped");
        }
        Err(e) => {
            tracing::error!(order_id = %order_id, error = %e, "Scheduled activation failed");
        }
    }
}
