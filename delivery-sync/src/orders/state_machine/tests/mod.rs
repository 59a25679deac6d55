use super::*;
use crate::test_support::{
    ApiCall, Harness, TENANT, harness, immediate_detail, pickup_detail, scheduled_detail,
};
use crate::services::RecipientType;

mod test_flows;

/// 直接通过状态机导入（不经过路由）
async fn import(h: &Harness, detail: OrderDetail) -> Order {
    h.state
        .orders
        .import_remote(TENANT, &detail, &format!("placed-{}", detail.id))
        .await
        .unwrap()
        .order
}

async fn apply(h: &Harness, order_id: &str, code: LifecycleCode) -> Result<TransitionOutcome> {
    let order = h.order(order_id);
    h.state
        .orders
        .apply_remote(&order, code, &format!("{}-{}", code, order.external_id))
        .await
}

fn courier_offers(h: &Harness) -> usize {
    h.notifier
        .sent()
        .iter()
        .filter(|n| n.recipient_type == RecipientType::Courier)
        .count()
}
