use super::*;

// ========================================================================
// Happy paths
// ========================================================================

#[tokio::test]
async fn test_immediate_delivery_lifecycle() {
    let h = harness();
    let order = import(&h, immediate_detail("A1")).await;
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(!order.is_scheduled);
    // PLACED: 门店通知 + 骑手搜索
    assert_eq!(h.couriers.searches().len(), 1);
    assert_eq!(courier_offers(&h), 2);

    let confirmed = apply(&h, &order.id, LifecycleCode::Confirmed).await.unwrap();
    assert_eq!(confirmed.previous, OrderStatus::Pending);
    assert_eq!(confirmed.order.status, OrderStatus::Preparing);
    assert!(confirmed
        .effects
        .contains(&SideEffect::CourierSearch { candidates: 2 }));

    let separated = apply(&h, &order.id, LifecycleCode::SeparationEnded)
        .await
        .unwrap();
    assert_eq!(separated.order.status, OrderStatus::Preparing);
    assert_eq!(h.couriers.searches().len(), 3);

    let assigned = h
        .state
        .orders
        .assign_courier(&order.id, CourierRef::new("c-1"))
        .await
        .unwrap();
    assert_eq!(assigned.order.status, OrderStatus::OutForDelivery);
    assert!(!assigned.reflect_failed);
    assert_eq!(
        assigned.order.courier.as_ref().map(|c| c.courier_id.as_str()),
        Some("c-1")
    );
    assert!(h.api.calls().contains(&ApiCall::AssignCourier("A1".into(), "c-1".into())));
    assert!(h.api.calls().contains(&ApiCall::Dispatch("A1".into())));

    let delivered = apply(&h, &order.id, LifecycleCode::Concluded).await.unwrap();
    assert_eq!(delivered.order.status, OrderStatus::Delivered);
}

#[tokio::test]
async fn test_pickup_lifecycle_skips_courier_search() {
    let h = harness();
    let order = import(&h, pickup_detail("P1")).await;
    assert!(order.is_pickup());
    assert!(h.couriers.searches().is_empty());

    let confirmed = apply(&h, &order.id, LifecycleCode::Confirmed).await.unwrap();
    assert_eq!(confirmed.order.status, OrderStatus::Preparing);
    assert_eq!(
        confirmed.effects,
        vec![SideEffect::StoreNotified, SideEffect::MarketplaceReadyForPickup]
    );
    assert_eq!(h.api.count(|c| *c == ApiCall::ReadyToPickup("P1".into())), 1);

    let ready = apply(&h, &order.id, LifecycleCode::SeparationEnded)
        .await
        .unwrap();
    assert_eq!(ready.order.status, OrderStatus::ReadyForPickup);

    let delivered = apply(&h, &order.id, LifecycleCode::Concluded).await.unwrap();
    assert_eq!(delivered.order.status, OrderStatus::Delivered);
    assert!(h.couriers.searches().is_empty());
}

#[tokio::test]
async fn test_remote_dispatch_moves_to_out_for_delivery() {
    let h = harness();
    let order = import(&h, immediate_detail("A2")).await;
    apply(&h, &order.id, LifecycleCode::Confirmed).await.unwrap();

    let dispatched = apply(&h, &order.id, LifecycleCode::Dispatched).await.unwrap();
    assert_eq!(dispatched.order.status, OrderStatus::OutForDelivery);
    // 平台驱动的迁移不回写平台
    assert_eq!(h.api.count(|c| matches!(c, ApiCall::Dispatch(_))), 0);
}

// ========================================================================
// Cancellation
// ========================================================================

#[tokio::test]
async fn test_cancellation_releases_and_blacklists_courier() {
    let h = harness();
    let order = import(&h, immediate_detail("A3")).await;
    apply(&h, &order.id, LifecycleCode::Confirmed).await.unwrap();
    h.state
        .orders
        .assign_courier(&order.id, CourierRef::new("c-1"))
        .await
        .unwrap();

    let cancelled = apply(&h, &order.id, LifecycleCode::Cancelled).await.unwrap();
    assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
    assert!(cancelled.order.courier.is_none());
    assert_eq!(cancelled.order.courier_blacklist, vec!["c-1".to_string()]);
    assert!(cancelled.effects.contains(&SideEffect::CourierReleased {
        courier_id: "c-1".into()
    }));
    assert_eq!(
        h.couriers.releases(),
        vec![(order.id.clone(), "c-1".to_string())]
    );

    // 释放记录随订单落盘
    let stored = h.state.orders.order(&order.id).unwrap().unwrap();
    assert_eq!(stored.courier_blacklist, vec!["c-1".to_string()]);
    assert!(stored.courier.is_none());
}

#[tokio::test]
async fn test_blacklisted_courier_never_receives_offer() {
    let h = harness();
    let order = import(&h, immediate_detail("A4")).await;
    h.state
        .storage
        .update_order(&order.id, |o| o.courier_blacklist.push("c-2".into()))
        .unwrap();
    let before = courier_offers(&h);

    let confirmed = apply(&h, &order.id, LifecycleCode::Confirmed).await.unwrap();
    assert!(confirmed
        .effects
        .contains(&SideEffect::CourierSearch { candidates: 1 }));
    assert_eq!(courier_offers(&h) - before, 1);
    assert_eq!(h.couriers.searches().last().unwrap(), &vec!["c-2".to_string()]);
}

#[tokio::test]
async fn test_request_cancellation_leaves_local_status() {
    let h = harness();
    let order = import(&h, immediate_detail("A5")).await;

    h.state
        .orders
        .request_cancellation(&order.id, "customer gave up", "501")
        .await
        .unwrap();
    assert!(h
        .api
        .calls()
        .contains(&ApiCall::RequestCancellation("A5".into(), "501".into())));
    assert_eq!(h.order(&order.id).status, OrderStatus::Pending);
}

// ========================================================================
// Scheduled activation
// ========================================================================

#[tokio::test]
async fn test_activation_confirms_with_marketplace() {
    let h = harness();
    let at = shared::util::now_millis() + 3_600_000;
    let order = import(&h, scheduled_detail("S1", at)).await;
    assert_eq!(order.status, OrderStatus::Scheduled);
    assert_eq!(order.scheduled_at, Some(at));
    assert!(h.couriers.searches().is_empty());

    let activated = h.state.orders.activate_scheduled(&order.id).await.unwrap();
    assert_eq!(activated.order.status, OrderStatus::Preparing);
    assert!(activated.effects.contains(&SideEffect::MarketplaceConfirmed));
    assert!(activated
        .effects
        .contains(&SideEffect::CourierSearch { candidates: 2 }));
    assert_eq!(h.api.count(|c| matches!(c, ApiCall::Confirm(_))), 1);
}

#[tokio::test]
async fn test_activation_retries_once_after_auth_expired() {
    let h = harness();
    let order = import(&h, scheduled_detail("S2", shared::util::now_millis() + 60_000)).await;
    h.api.expire_auth(1);

    let activated = h.state.orders.activate_scheduled(&order.id).await.unwrap();
    assert!(!activated.reflect_failed);
    assert_eq!(h.api.count(|c| matches!(c, ApiCall::Confirm(_))), 2);
}

#[tokio::test]
async fn test_reflect_failure_does_not_roll_back() {
    let h = harness();
    let order = import(&h, scheduled_detail("S3", shared::util::now_millis() + 60_000)).await;
    h.api
        .fail_actions(Some(marketplace_client::MarketplaceError::Transient(
            "gateway timeout".into(),
        )));

    let activated = h.state.orders.activate_scheduled(&order.id).await.unwrap();
    assert!(activated.reflect_failed);
    assert!(!activated.effects.contains(&SideEffect::MarketplaceConfirmed));
    assert_eq!(h.order(&order.id).status, OrderStatus::Preparing);
}

#[tokio::test]
async fn test_scheduled_pickup_activation_marks_ready() {
    let h = harness();
    let at = shared::util::now_millis() + 60_000;
    let order = import(
        &h,
        OrderDetail {
            order_type: shared::marketplace::OrderType::Takeout,
            ..scheduled_detail("S4", at)
        },
    )
    .await;
    assert!(order.is_pickup());

    let activated = h.state.orders.activate_scheduled(&order.id).await.unwrap();
    assert_eq!(activated.order.status, OrderStatus::Preparing);
    assert!(activated.effects.contains(&SideEffect::MarketplaceConfirmed));
    assert!(activated
        .effects
        .contains(&SideEffect::MarketplaceReadyForPickup));
    assert_eq!(h.api.count(|c| *c == ApiCall::ReadyToPickup("S4".into())), 1);
    assert!(h.couriers.searches().is_empty());
}

#[tokio::test]
async fn test_pickup_ready_failure_is_recorded() {
    let h = harness();
    let order = import(&h, pickup_detail("P2")).await;
    h.api
        .fail_actions(Some(marketplace_client::MarketplaceError::Transient(
            "gateway timeout".into(),
        )));

    let confirmed = apply(&h, &order.id, LifecycleCode::Confirmed).await.unwrap();
    assert!(confirmed.reflect_failed);
    assert_eq!(confirmed.order.status, OrderStatus::Preparing);
    assert!(!confirmed
        .effects
        .contains(&SideEffect::MarketplaceReadyForPickup));
}
