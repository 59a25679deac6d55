//! Polling Supervisor - 按租户轮询平台事件
//!
//! 每个租户一个独立的 tokio 任务：
//!
//! ```text
//! loop {
//!     poll_events ──► EventRouter::route_polled ──► acknowledge_events
//!     成功 → 错误计数清零
//!     拉取 / 确认失败或批次中出现致命错误 → 计数 +1，达到阈值 → 挂起 cooldown → 清零后恢复
//!     sleep(interval)
//! }
//! ```
//!
//! 停止只取消令牌：进行中的一轮会跑完，循环在下一个边界退出。

use crate::core::Result;
use crate::events::{BatchReport, EventRouter};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use marketplace_client::{MarketplaceApi, with_auth_retry};
use parking_lot::Mutex;
use shared::util::now_millis;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 轮询参数
#[derive(Debug, Clone, Copy)]
pub struct PollingConfig {
    pub interval: Duration,
    /// 连续失败多少次后挂起
    pub error_threshold: u32,
    pub cooldown: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            error_threshold: 5,
            cooldown: Duration::from_secs(300),
        }
    }
}

/// 单个租户的轮询状态
struct PollingState {
    tenant_id: String,
    merchant_id: String,
    is_active: AtomicBool,
    suspended: AtomicBool,
    /// 0 = 尚未轮询
    last_poll_at: AtomicI64,
    consecutive_errors: AtomicU32,
    shutdown: CancellationToken,
}

impl PollingState {
    fn new(tenant_id: &str, merchant_id: &str, shutdown: CancellationToken) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            merchant_id: merchant_id.to_string(),
            is_active: AtomicBool::new(true),
            suspended: AtomicBool::new(false),
            last_poll_at: AtomicI64::new(0),
            consecutive_errors: AtomicU32::new(0),
            shutdown,
        }
    }

    fn snapshot(&self) -> PollingSnapshot {
        let last_poll_at = self.last_poll_at.load(Ordering::Acquire);
        PollingSnapshot {
            tenant_id: self.tenant_id.clone(),
            merchant_id: self.merchant_id.clone(),
            is_active: self.is_active.load(Ordering::Acquire),
            suspended: self.suspended.load(Ordering::Acquire),
            last_poll_at: (last_poll_at > 0).then_some(last_poll_at),
            consecutive_errors: self.consecutive_errors.load(Ordering::Acquire),
        }
    }
}

/// 轮询状态快照（只读）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingSnapshot {
    pub tenant_id: String,
    pub merchant_id: String,
    pub is_active: bool,
    pub suspended: bool,
    pub last_poll_at: Option<i64>,
    pub consecutive_errors: u32,
}

pub struct PollingSupervisor {
    api: Arc<dyn MarketplaceApi>,
    router: Arc<EventRouter>,
    config: PollingConfig,
    root: CancellationToken,
    tenants: DashMap<String, Arc<PollingState>>,
    /// 每个租户最近一次启动的循环（停止后保留到下次启动）
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl PollingSupervisor {
    pub fn new(
        api: Arc<dyn MarketplaceApi>,
        router: Arc<EventRouter>,
        config: PollingConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            api,
            router,
            config,
            root: shutdown,
            tenants: DashMap::new(),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// 启动租户轮询，已在运行时返回 false
    ///
    /// 刚停止的旧循环若仍在执行本轮，新循环先等它退出再开始轮询。
    pub fn start(&self, tenant_id: &str, merchant_id: &str) -> bool {
        if self.root.is_cancelled() {
            tracing::warn!(tenant_id = %tenant_id, "Polling supervisor is shut down, refusing to start");
            return false;
        }

        match self.tenants.entry(tenant_id.to_string()) {
            Entry::Occupied(_) => {
                tracing::debug!(tenant_id = %tenant_id, "Polling already active");
                false
            }
            Entry::Vacant(slot) => {
                let state = Arc::new(PollingState::new(
                    tenant_id,
                    merchant_id,
                    self.root.child_token(),
                ));
                slot.insert(state.clone());

                let mut handles = self.handles.lock();
                let previous = handles
                    .remove(tenant_id)
                    .filter(|h| !h.is_finished());
                let handle = tokio::spawn(run_loop(
                    self.api.clone(),
                    self.router.clone(),
                    self.config,
                    state,
                    previous,
                ));
                handles.insert(tenant_id.to_string(), handle);
                true
            }
        }
    }

    /// 停止租户轮询，未在运行时返回 false
    pub fn stop(&self, tenant_id: &str) -> bool {
        match self.tenants.remove(tenant_id) {
            Some((_, state)) => {
                state.is_active.store(false, Ordering::Release);
                state.shutdown.cancel();
                tracing::info!(tenant_id = %tenant_id, "Polling stop requested");
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self, tenant_id: &str) -> Option<PollingSnapshot> {
        self.tenants.get(tenant_id).map(|s| s.snapshot())
    }

    pub fn active_tenants(&self) -> Vec<String> {
        let mut tenants: Vec<String> = self.tenants.iter().map(|e| e.key().clone()).collect();
        tenants.sort();
        tenants
    }

    /// 停止所有轮询并等待任务退出
    pub async fn shutdown(&self) {
        self.root.cancel();
        for entry in self.tenants.iter() {
            entry.value().is_active.store(false, Ordering::Release);
        }
        self.tenants.clear();

        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain().map(|(_, h)| h).collect();
        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Polling task panicked");
            }
        }
        tracing::info!(tasks = count, "Polling supervisor shut down");
    }
}

async fn run_loop(
    api: Arc<dyn MarketplaceApi>,
    router: Arc<EventRouter>,
    config: PollingConfig,
    state: Arc<PollingState>,
    previous: Option<JoinHandle<()>>,
) {
    let tenant_id = state.tenant_id.clone();
    if let Some(previous) = previous {
        tracing::debug!(tenant_id = %tenant_id, "Waiting for previous polling loop to exit");
        if let Err(e) = previous.await {
            tracing::error!(tenant_id = %tenant_id, error = %e, "Previous polling task panicked");
        }
    }

    tracing::info!(
        tenant_id = %tenant_id,
        merchant_id = %state.merchant_id,
        interval_secs = config.interval.as_secs(),
        "Polling started"
    );

    loop {
        if state.shutdown.is_cancelled() {
            break;
        }

        let result = poll_once(api.as_ref(), &router, &state).await;
        state.last_poll_at.store(now_millis(), Ordering::Release);

        match result {
            Ok(report) => {
                state.consecutive_errors.store(0, Ordering::Release);
                if report.total() > 0 {
                    tracing::debug!(
                        tenant_id = %tenant_id,
                        routed = report.routed,
                        skipped = report.skipped,
                        failed = report.failed,
                        acked = report.ack_ids.len(),
                        "Polling batch processed"
                    );
                }
            }
            Err(e) => {
                let errors = state.consecutive_errors.fetch_add(1, Ordering::AcqRel) + 1;
                tracing::warn!(
                    tenant_id = %tenant_id,
                    error = %e,
                    consecutive_errors = errors,
                    "Polling iteration failed"
                );

                if errors >= config.error_threshold {
                    state.suspended.store(true, Ordering::Release);
                    tracing::error!(
                        tenant_id = %tenant_id,
                        cooldown_secs = config.cooldown.as_secs(),
                        "Polling suspended after consecutive failures"
                    );
                    tokio::select! {
                        _ = state.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(config.cooldown) => {}
                    }
                    state.consecutive_errors.store(0, Ordering::Release);
                    state.suspended.store(false, Ordering::Release);
                    tracing::info!(tenant_id = %tenant_id, "Polling resumed after cooldown");
                    continue;
                }
            }
        }

        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = tokio::time::sleep(config.interval) => {}
        }
    }

    state.is_active.store(false, Ordering::Release);
    tracing::info!(tenant_id = %tenant_id, "Polling stopped");
}

/// 一轮：拉取 → 路由 → 确认
async fn poll_once(
    api: &dyn MarketplaceApi,
    router: &EventRouter,
    state: &PollingState,
) -> Result<BatchReport> {
    let tenant_id = state.tenant_id.as_str();
    let merchant_id = state.merchant_id.as_str();

    let events = with_auth_retry(move || api.poll_events(tenant_id, merchant_id)).await?;
    if events.is_empty() {
        return Ok(BatchReport::default());
    }

    let mut report = router.route_polled(tenant_id, events).await;

    if !report.ack_ids.is_empty() {
        let ids = report.ack_ids.as_slice();
        with_auth_retry(move || api.acknowledge_events(tenant_id, ids)).await?;
    }

    match report.fatal.take() {
        Some(fatal) => Err(fatal),
        None => Ok(report),
    }
}
