//! 测试替身：内存平台、记录型骑手调度与通知

use crate::core::{Config, Result, SyncState};
use crate::services::{CourierCandidate, CourierDispatcher, Notification, Notifier};
use crate::storage::SyncStorage;
use async_trait::async_trait;
use marketplace_client::{AlternativeProposal, MarketplaceApi, MarketplaceError, MarketplaceResult};
use parking_lot::Mutex;
use shared::marketplace::{
    CancellationRequest, CourierAssignment, MerchantRef, OrderDetail, OrderSchedule, OrderType,
    PolledEvent,
};
use shared::order::{Coordinates, CourierRef, Order, OrderTiming};
use shared::util::millis_to_rfc3339;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::time::Instant;

pub const TENANT: &str = "tenant-1";
pub const MERCHANT: &str = "merchant-1";

// ============================================================================
// Fake marketplace
// ============================================================================

/// 记录的平台调用
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    Poll(String),
    Acknowledge(Vec<String>),
    FetchDetail(String),
    Confirm(String),
    Dispatch(String),
    ReadyToPickup(String),
    RequestCancellation(String, String),
    AssignCourier(String, String),
    AcceptDispute(String),
    RejectDispute(String, String),
    ProposeAlternative(String, String),
}

#[derive(Default)]
pub struct FakeMarketplace {
    details: Mutex<HashMap<String, OrderDetail>>,
    batches: Mutex<HashMap<String, VecDeque<Vec<PolledEvent>>>>,
    failing_polls: Mutex<HashMap<String, MarketplaceError>>,
    action_failure: Mutex<Option<MarketplaceError>>,
    auth_failures: Mutex<usize>,
    calls: Mutex<Vec<ApiCall>>,
    polls_at: Mutex<Vec<(String, Instant)>>,
    poll_delay: Mutex<Option<std::time::Duration>>,
}

impl FakeMarketplace {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_order(&self, detail: OrderDetail) {
        self.details.lock().insert(detail.id.clone(), detail);
    }

    /// 下一次轮询返回的事件
    pub fn queue_events(&self, tenant_id: &str, events: Vec<PolledEvent>) {
        self.batches
            .lock()
            .entry(tenant_id.to_string())
            .or_default()
            .push_back(events);
    }

    /// 该租户的轮询一直返回 Transient
    pub fn fail_polls(&self, tenant_id: &str) {
        self.fail_polls_with(
            tenant_id,
            MarketplaceError::Transient("connection reset".into()),
        );
    }

    /// 该租户的轮询一直返回指定错误
    pub fn fail_polls_with(&self, tenant_id: &str, error: MarketplaceError) {
        self.failing_polls.lock().insert(tenant_id.to_string(), error);
    }

    /// 所有订单/协商动作返回该错误
    pub fn fail_actions(&self, error: Option<MarketplaceError>) {
        *self.action_failure.lock() = error;
    }

    /// 每次轮询在返回前等待（模拟慢请求）
    pub fn delay_polls(&self, delay: std::time::Duration) {
        *self.poll_delay.lock() = Some(delay);
    }

    /// 接下来 n 次动作返回 401
    pub fn expire_auth(&self, times: usize) {
        *self.auth_failures.lock() = times;
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&ApiCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn poll_times(&self, tenant_id: &str) -> Vec<Instant> {
        self.polls_at
            .lock()
            .iter()
            .filter(|(t, _)| t == tenant_id)
            .map(|(_, at)| *at)
            .collect()
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().push(call);
    }

    fn action(&self, call: ApiCall) -> MarketplaceResult<()> {
        self.record(call);
        {
            let mut auth = self.auth_failures.lock();
            if *auth > 0 {
                *auth -= 1;
                return Err(MarketplaceError::AuthExpired);
            }
        }
        match self.action_failure.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MarketplaceApi for FakeMarketplace {
    async fn poll_events(
        &self,
        tenant_id: &str,
        _merchant_id: &str,
    ) -> MarketplaceResult<Vec<PolledEvent>> {
        self.record(ApiCall::Poll(tenant_id.to_string()));
        self.polls_at
            .lock()
            .push((tenant_id.to_string(), Instant::now()));
        let delay = *self.poll_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failing_polls.lock().get(tenant_id).cloned() {
            return Err(err);
        }
        Ok(self
            .batches
            .lock()
            .get_mut(tenant_id)
            .and_then(|q| q.pop_front())
            .unwrap_or_default())
    }

    async fn acknowledge_events(
        &self,
        _tenant_id: &str,
        event_ids: &[String],
    ) -> MarketplaceResult<()> {
        self.record(ApiCall::Acknowledge(event_ids.to_vec()));
        Ok(())
    }

    async fn fetch_order_detail(
        &self,
        _tenant_id: &str,
        order_id: &str,
    ) -> MarketplaceResult<OrderDetail> {
        self.record(ApiCall::FetchDetail(order_id.to_string()));
        self.details
            .lock()
            .get(order_id)
            .cloned()
            .ok_or_else(|| MarketplaceError::Api {
                status: 404,
                body: format!("order {order_id} not found"),
            })
    }

    async fn confirm(&self, _tenant_id: &str, order_id: &str) -> MarketplaceResult<()> {
        self.action(ApiCall::Confirm(order_id.to_string()))
    }

    async fn dispatch(&self, _tenant_id: &str, order_id: &str) -> MarketplaceResult<()> {
        self.action(ApiCall::Dispatch(order_id.to_string()))
    }

    async fn mark_ready_for_pickup(
        &self,
        _tenant_id: &str,
        order_id: &str,
    ) -> MarketplaceResult<()> {
        self.action(ApiCall::ReadyToPickup(order_id.to_string()))
    }

    async fn request_cancellation(
        &self,
        _tenant_id: &str,
        order_id: &str,
        request: &CancellationRequest,
    ) -> MarketplaceResult<()> {
        self.action(ApiCall::RequestCancellation(
            order_id.to_string(),
            request.cancellation_code.clone(),
        ))
    }

    async fn assign_courier(
        &self,
        _tenant_id: &str,
        order_id: &str,
        assignment: &CourierAssignment,
    ) -> MarketplaceResult<()> {
        self.action(ApiCall::AssignCourier(
            order_id.to_string(),
            assignment.worker_id.clone(),
        ))
    }

    async fn accept_dispute(
        &self,
        _tenant_id: &str,
        dispute_id: &str,
        _reason: Option<&str>,
    ) -> MarketplaceResult<()> {
        self.action(ApiCall::AcceptDispute(dispute_id.to_string()))
    }

    async fn reject_dispute(
        &self,
        _tenant_id: &str,
        dispute_id: &str,
        reason: &str,
    ) -> MarketplaceResult<()> {
        self.action(ApiCall::RejectDispute(
            dispute_id.to_string(),
            reason.to_string(),
        ))
    }

    async fn propose_alternative(
        &self,
        _tenant_id: &str,
        dispute_id: &str,
        proposal: &AlternativeProposal,
    ) -> MarketplaceResult<()> {
        self.action(ApiCall::ProposeAlternative(
            dispute_id.to_string(),
            proposal.alternative_id.clone(),
        ))
    }
}

// ============================================================================
// Collaborators
// ============================================================================

#[derive(Default)]
pub struct RecordingDispatcher {
    candidates: Mutex<Vec<CourierCandidate>>,
    searches: Mutex<Vec<Vec<String>>>,
    releases: Mutex<Vec<(String, String)>>,
}

impl RecordingDispatcher {
    pub fn with_candidates(ids: &[&str]) -> Arc<Self> {
        let dispatcher = Self::default();
        *dispatcher.candidates.lock() = ids.iter().map(|id| CourierCandidate::new(*id)).collect();
        Arc::new(dispatcher)
    }

    /// 每次搜索传入的排除列表
    pub fn searches(&self) -> Vec<Vec<String>> {
        self.searches.lock().clone()
    }

    /// (order_id, courier_id)
    pub fn releases(&self) -> Vec<(String, String)> {
        self.releases.lock().clone()
    }
}

#[async_trait]
impl CourierDispatcher for RecordingDispatcher {
    async fn rank_candidates(
        &self,
        _origin: Option<&Coordinates>,
        excluded: &[String],
    ) -> Result<Vec<CourierCandidate>> {
        self.searches.lock().push(excluded.to_vec());
        // 故意不过滤 excluded，验证调用方自己会过滤
        Ok(self.candidates.lock().clone())
    }

    async fn release(&self, order: &Order, courier: &CourierRef) -> Result<()> {
        self.releases
            .lock()
            .push((order.id.clone(), courier.courier_id.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) {
        self.sent.lock().push(notification);
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn immediate_detail(order_id: &str) -> OrderDetail {
    OrderDetail {
        id: order_id.to_string(),
        display_id: Some(format!("#{order_id}")),
        order_type: OrderType::Delivery,
        order_timing: OrderTiming::Immediate,
        schedule: None,
        merchant: Some(MerchantRef {
            id: MERCHANT.to_string(),
            name: Some("Test Store".to_string()),
            coordinates: Some(Coordinates {
                latitude: -23.55,
                longitude: -46.63,
            }),
        }),
    }
}

pub fn pickup_detail(order_id: &str) -> OrderDetail {
    OrderDetail {
        order_type: OrderType::Takeout,
        ..immediate_detail(order_id)
    }
}

pub fn scheduled_detail(order_id: &str, at_millis: i64) -> OrderDetail {
    OrderDetail {
        order_timing: OrderTiming::Scheduled,
        schedule: Some(OrderSchedule {
            delivery_date_time_start: millis_to_rfc3339(at_millis),
            delivery_date_time_end: None,
        }),
        ..immediate_detail(order_id)
    }
}

pub fn polled(id: &str, code: &str, order_id: &str) -> PolledEvent {
    PolledEvent {
        id: id.to_string(),
        code: code.to_string(),
        full_code: None,
        order_id: order_id.to_string(),
        merchant_id: Some(MERCHANT.to_string()),
        created_at: None,
        metadata: None,
    }
}

pub fn polled_with_metadata(
    id: &str,
    code: &str,
    order_id: &str,
    metadata: serde_json::Value,
) -> PolledEvent {
    PolledEvent {
        metadata: Some(metadata),
        ..polled(id, code, order_id)
    }
}

/// 组装完整同步核心（内存存储 + 测试替身）
pub struct Harness {
    pub state: SyncState,
    pub api: Arc<FakeMarketplace>,
    pub couriers: Arc<RecordingDispatcher>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn harness() -> Harness {
    harness_with(Config::with_overrides("/tmp/delivery-sync-test"))
}

pub fn harness_with(config: Config) -> Harness {
    let storage = SyncStorage::open_in_memory().expect("in-memory storage");
    let api = FakeMarketplace::new();
    let couriers = RecordingDispatcher::with_candidates(&["c-1", "c-2"]);
    let notifier = Arc::new(RecordingNotifier::default());
    let state = SyncState::new(
        config,
        storage,
        api.clone(),
        couriers.clone(),
        notifier.clone(),
    );
    state.tenants.register(TENANT, MERCHANT);
    Harness {
        state,
        api,
        couriers,
        notifier,
    }
}

impl Harness {
    /// 导入一个订单并返回本地记录
    pub async fn import(&self, detail: OrderDetail) -> Order {
        let external_id = detail.id.clone();
        self.api.add_order(detail);
        self.state
            .router
            .route_polled(TENANT, vec![polled(&format!("placed-{external_id}"), "PLC", &external_id)])
            .await;
        self.state
            .orders
            .order_by_external_id(&external_id)
            .expect("storage")
            .expect("order imported")
    }

    pub fn order(&self, order_id: &str) -> Order {
        self.state
            .orders
            .order(order_id)
            .expect("storage")
            .expect("order exists")
    }
}
