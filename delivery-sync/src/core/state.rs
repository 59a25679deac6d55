//! 同步核心状态
//!
//! 组装所有服务（存储、状态机、路由、轮询、预约激活、协商台账），
//! 协作方通过构造参数注入。克隆成本低（内部全是 Arc）。

use crate::core::{BackgroundTasks, Config, TaskKind};
use crate::disputes::DisputeLedger;
use crate::events::EventRouter;
use crate::orders::OrderStateMachine;
use crate::polling::{PollingConfig, PollingSupervisor};
use crate::scheduling::ScheduledActivationService;
use crate::services::{CourierDispatcher, Notifier};
use crate::storage::SyncStorage;
use crate::tenants::TenantRegistry;
use marketplace_client::MarketplaceApi;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct SyncState {
    pub config: Config,
    pub storage: SyncStorage,
    pub api: Arc<dyn MarketplaceApi>,
    pub orders: Arc<OrderStateMachine>,
    pub activations: Arc<ScheduledActivationService>,
    pub disputes: Arc<DisputeLedger>,
    pub tenants: Arc<TenantRegistry>,
    pub router: Arc<EventRouter>,
    pub polling: Arc<PollingSupervisor>,
}

impl SyncState {
    pub fn new(
        config: Config,
        storage: SyncStorage,
        api: Arc<dyn MarketplaceApi>,
        couriers: Arc<dyn CourierDispatcher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let orders = Arc::new(OrderStateMachine::new(
            storage.clone(),
            api.clone(),
            couriers,
            notifier,
        ));
        let activations = Arc::new(ScheduledActivationService::new(
            storage.clone(),
            orders.clone(),
            config.schedule_sweep_interval(),
            config.schedule_sweep_window(),
        ));
        let disputes = Arc::new(DisputeLedger::new(
            storage.clone(),
            api.clone(),
            config.dispute_default_ttl(),
        ));
        let tenants = Arc::new(TenantRegistry::new());
        let router = Arc::new(EventRouter::new(
            orders.clone(),
            activations.clone(),
            disputes.clone(),
            api.clone(),
            tenants.clone(),
        ));
        let polling = Arc::new(PollingSupervisor::new(
            api.clone(),
            router.clone(),
            PollingConfig {
                interval: config.poll_interval(),
                error_threshold: config.poll_error_threshold,
                cooldown: config.poll_cooldown(),
            },
            CancellationToken::new(),
        ));

        Self {
            config,
            storage,
            api,
            orders,
            activations,
            disputes,
            tenants,
            router,
            polling,
        }
    }

    /// 注册周期任务：预约激活补偿扫描 + 协商过期扫描
    ///
    /// 租户轮询由 [`PollingSupervisor`] 自行管理，不在此注册。
    pub fn start_background_tasks(&self, tasks: &mut BackgroundTasks) {
        let activations = self.activations.clone();
        let token = tasks.shutdown_token();
        tasks.spawn("schedule_sweeper", TaskKind::Periodic, async move {
            activations.run_sweeper(token).await;
        });

        let disputes = self.disputes.clone();
        let token = tasks.shutdown_token();
        let every = self.config.dispute_sweep_interval();
        tasks.spawn("dispute_expiry_sweeper", TaskKind::Periodic, async move {
            disputes.run_expiry_sweeper(token, every).await;
        });
    }
}
