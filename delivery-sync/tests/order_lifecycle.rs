//! End-to-end: 事件 → 路由 → 状态机 / 协商台账（内存存储 + 平台替身）

use async_trait::async_trait;
use delivery_sync::services::{CourierCandidate, CourierDispatcher, LoggingNotifier};
use delivery_sync::{Config, RouteOutcome, SyncError, SyncState, SyncStorage};
use marketplace_client::{AlternativeProposal, MarketplaceApi, MarketplaceError, MarketplaceResult};
use parking_lot::Mutex;
use serde_json::json;
use shared::dispute::DisputeStatus;
use shared::marketplace::{
    CancellationRequest, CourierAssignment, MerchantRef, OrderDetail, OrderType, PolledEvent,
    WebhookEvent,
};
use shared::order::{Coordinates, CourierRef, Order, OrderStatus, OrderTiming};
use shared::util::now_millis;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const TENANT: &str = "tenant-e2e";
const MERCHANT: &str = "merchant-e2e";

#[derive(Default)]
struct StubMarketplace {
    details: Mutex<HashMap<String, OrderDetail>>,
    actions: Mutex<Vec<String>>,
}

impl StubMarketplace {
    fn record(&self, action: String) -> MarketplaceResult<()> {
        self.actions.lock().push(action);
        Ok(())
    }
}

#[async_trait]
impl MarketplaceApi for StubMarketplace {
    async fn poll_events(&self, _: &str, _: &str) -> MarketplaceResult<Vec<PolledEvent>> {
        Ok(Vec::new())
    }

    async fn acknowledge_events(&self, _: &str, _: &[String]) -> MarketplaceResult<()> {
        Ok(())
    }

    async fn fetch_order_detail(&self, _: &str, order_id: &str) -> MarketplaceResult<OrderDetail> {
        self.details
            .lock()
            .get(order_id)
            .cloned()
            .ok_or_else(|| MarketplaceError::Api {
                status: 404,
                body: "not found".into(),
            })
    }

    async fn confirm(&self, _: &str, order_id: &str) -> MarketplaceResult<()> {
        self.record(format!("confirm:{order_id}"))
    }

    async fn dispatch(&self, _: &str, order_id: &str) -> MarketplaceResult<()> {
        self.record(format!("dispatch:{order_id}"))
    }

    async fn mark_ready_for_pickup(&self, _: &str, order_id: &str) -> MarketplaceResult<()> {
        self.record(format!("ready:{order_id}"))
    }

    async fn request_cancellation(
        &self,
        _: &str,
        order_id: &str,
        _: &CancellationRequest,
    ) -> MarketplaceResult<()> {
        self.record(format!("cancel:{order_id}"))
    }

    async fn assign_courier(
        &self,
        _: &str,
        order_id: &str,
        assignment: &CourierAssignment,
    ) -> MarketplaceResult<()> {
        self.record(format!("assign:{order_id}:{}", assignment.worker_id))
    }

    async fn accept_dispute(&self, _: &str, dispute_id: &str, _: Option<&str>) -> MarketplaceResult<()> {
        self.record(format!("accept:{dispute_id}"))
    }

    async fn reject_dispute(&self, _: &str, dispute_id: &str, _: &str) -> MarketplaceResult<()> {
        self.record(format!("reject:{dispute_id}"))
    }

    async fn propose_alternative(
        &self,
        _: &str,
        dispute_id: &str,
        _: &AlternativeProposal,
    ) -> MarketplaceResult<()> {
        self.record(format!("counter:{dispute_id}"))
    }
}

#[derive(Default)]
struct CountingDispatcher {
    searches: AtomicUsize,
}

#[async_trait]
impl CourierDispatcher for CountingDispatcher {
    async fn rank_candidates(
        &self,
        _origin: Option<&Coordinates>,
        _excluded: &[String],
    ) -> delivery_sync::Result<Vec<CourierCandidate>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok(vec![CourierCandidate::new("courier-7")])
    }

    async fn release(&self, _order: &Order, _courier: &CourierRef) -> delivery_sync::Result<()> {
        Ok(())
    }
}

struct Env {
    state: SyncState,
    api: Arc<StubMarketplace>,
    couriers: Arc<CountingDispatcher>,
}

fn env() -> Env {
    let api = Arc::new(StubMarketplace::default());
    let couriers = Arc::new(CountingDispatcher::default());
    let state = SyncState::new(
        Config::with_overrides("/tmp/delivery-sync-e2e"),
        SyncStorage::open_in_memory().unwrap(),
        api.clone(),
        couriers.clone(),
        Arc::new(LoggingNotifier),
    );
    state.tenants.register(TENANT, MERCHANT);
    Env {
        state,
        api,
        couriers,
    }
}

fn webhook(code: &str, order_id: &str) -> WebhookEvent {
    WebhookEvent {
        full_code: code.to_string(),
        order_id: order_id.to_string(),
        id: None,
        merchant_id: Some(MERCHANT.to_string()),
        metadata: None,
    }
}

fn polled(id: &str, code: &str, order_id: &str, metadata: serde_json::Value) -> PolledEvent {
    PolledEvent {
        id: id.to_string(),
        code: code.to_string(),
        full_code: None,
        order_id: order_id.to_string(),
        merchant_id: Some(MERCHANT.to_string()),
        created_at: None,
        metadata: Some(metadata),
    }
}

#[tokio::test]
async fn immediate_delivery_order_reaches_delivered_and_stays_there() {
    let env = env();
    env.api.details.lock().insert(
        "A1".into(),
        OrderDetail {
            id: "A1".into(),
            display_id: Some("1234".into()),
            order_type: OrderType::Delivery,
            order_timing: OrderTiming::Immediate,
            schedule: None,
            merchant: Some(MerchantRef {
                id: MERCHANT.into(),
                name: None,
                coordinates: None,
            }),
        },
    );
    let router = &env.state.router;

    let placed = router.route_webhook(webhook("PLACED", "A1")).await.unwrap();
    let RouteOutcome::Imported { order, .. } = placed else {
        panic!("expected import, got {placed:?}");
    };
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.tenant_id, TENANT);
    let searches_after_placed = env.couriers.searches.load(Ordering::SeqCst);

    let confirmed = router.route_webhook(webhook("CONFIRMED", "A1")).await.unwrap();
    let RouteOutcome::Transitioned(confirmed) = confirmed else {
        panic!("expected transition");
    };
    assert_eq!(confirmed.order.status, OrderStatus::Preparing);
    assert_eq!(
        env.couriers.searches.load(Ordering::SeqCst),
        searches_after_placed + 1
    );

    let dispatched = env
        .state
        .orders
        .assign_courier(&order.id, CourierRef::new("courier-7"))
        .await
        .unwrap();
    assert_eq!(dispatched.order.status, OrderStatus::OutForDelivery);

    router.route_webhook(webhook("CONCLUDED", "A1")).await.unwrap();
    assert_eq!(
        env.state.orders.order(&order.id).unwrap().unwrap().status,
        OrderStatus::Delivered
    );

    let late_cancel = router.route_webhook(webhook("CANCELLED", "A1")).await;
    assert!(matches!(
        late_cancel,
        Err(SyncError::OrderAlreadyTerminal { .. })
    ));
    assert_eq!(
        env.state.orders.order(&order.id).unwrap().unwrap().status,
        OrderStatus::Delivered
    );

    let actions = env.api.actions.lock().clone();
    assert!(actions.contains(&"assign:A1:courier-7".to_string()));
    assert!(actions.contains(&"dispatch:A1".to_string()));
}

#[tokio::test]
async fn dispute_is_deduplicated_and_settled() {
    let env = env();
    let router = &env.state.router;
    let before = now_millis();

    let dispute = polled("d1", "HANDSHAKE_DISPUTE", "A1", json!({ "disputeId": "d1" }));
    let report = router
        .route_polled(TENANT, vec![dispute.clone(), dispute])
        .await;
    assert_eq!(report.routed, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.ack_ids.len(), 2);

    let stored = env.state.disputes.dispute("d1").unwrap().unwrap();
    assert_eq!(stored.status, DisputeStatus::Pending);
    let day = 24 * 60 * 60 * 1000;
    assert!(stored.expires_at >= before + day);
    assert!(stored.expires_at <= now_millis() + day);

    let settlement = polled(
        "s1",
        "HANDSHAKE_SETTLEMENT",
        "A1",
        json!({ "disputeId": "d1", "result": "ACCEPTED" }),
    );
    let report = router.route_polled(TENANT, vec![settlement]).await;
    assert_eq!(report.routed, 1);

    let stored = env.state.disputes.dispute("d1").unwrap().unwrap();
    assert_eq!(stored.status, DisputeStatus::Settled);
}
