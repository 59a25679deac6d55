//! DisputeLedger - 协商 / 结算子账本
//!
//! ```text
//! HANDSHAKE_DISPUTE ──► upsert_dispute ──► PENDING
//!                                           ├─ apply_merchant_response ─► ACCEPTED / REJECTED / COUNTER_PROPOSED
//!                                           ├─ expire_overdue ──────────► EXPIRED
//!                                           └─ HANDSHAKE_SETTLEMENT ────► SETTLED
//! ```
//!
//! 去重键是事件 ID（持久化在 `dispute_events` / `settlements` 表），重启后依然有效。
//! 结算可能先于协商到达：先落库，协商插入时再回链。

use crate::core::{Result, SyncError};
use crate::storage::{ConditionalUpdate, DisputeInsert, SyncStorage};
use marketplace_client::{AlternativeProposal, MarketplaceApi, with_auth_retry};
use shared::dispute::{Dispute, DisputeStatus, MerchantAction, Settlement};
use shared::marketplace::{DisputePayload, RemoteEvent, SettlementPayload};
use shared::util::now_millis;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 结算可以覆盖的协商状态（除已结算外全部）
const SETTLEABLE: &[DisputeStatus] = &[
    DisputeStatus::Pending,
    DisputeStatus::Accepted,
    DisputeStatus::Rejected,
    DisputeStatus::CounterProposed,
    DisputeStatus::Expired,
];

pub struct DisputeLedger {
    storage: SyncStorage,
    api: Arc<dyn MarketplaceApi>,
    default_ttl: Duration,
}

impl DisputeLedger {
    pub fn new(storage: SyncStorage, api: Arc<dyn MarketplaceApi>, default_ttl: Duration) -> Self {
        Self {
            storage,
            api,
            default_ttl,
        }
    }

    pub fn dispute(&self, dispute_id: &str) -> Result<Option<Dispute>> {
        Ok(self.storage.get_dispute(dispute_id)?)
    }

    pub fn settlement(&self, event_id: &str) -> Result<Option<Settlement>> {
        Ok(self.storage.get_settlement(event_id)?)
    }

    /// 协商事件 → PENDING 记录（重复事件 / 重复协商 ID 返回 DuplicateEvent）
    pub fn upsert_dispute(
        &self,
        event: &RemoteEvent,
        payload: &DisputePayload,
        tenant_id: Option<String>,
    ) -> Result<Dispute> {
        let now = now_millis();
        let expires_at = payload
            .expires_at_millis()
            .unwrap_or(now + self.default_ttl.as_millis() as i64);

        let dispute = Dispute {
            dispute_id: payload.dispute_id.clone(),
            order_id: event.order_id.clone(),
            tenant_id,
            dispute_type: payload.dispute_type.clone(),
            status: DisputeStatus::Pending,
            expires_at,
            source_event_id: event.event_id.clone(),
            message: payload.message.clone(),
            alternatives: payload.alternatives.clone(),
            response_note: None,
            created_at: now,
            updated_at: now,
        };

        match self.storage.insert_dispute_if_absent(&dispute)? {
            DisputeInsert::Inserted => {}
            DisputeInsert::DuplicateEvent | DisputeInsert::DuplicateDispute => {
                return Err(SyncError::DuplicateEvent {
                    event_id: event.event_id.clone(),
                });
            }
        }
        tracing::info!(
            dispute_id = %dispute.dispute_id,
            order_id = %dispute.order_id,
            dispute_type = %dispute.dispute_type,
            expires_at = expires_at,
            "Dispute opened"
        );

        // 先到的结算
        let early = self.storage.unlinked_settlements_for(&dispute.dispute_id)?;
        if early.is_empty() {
            return Ok(dispute);
        }
        for settlement in &early {
            self.storage
                .link_settlement(&settlement.event_id, &dispute.dispute_id)?;
        }
        tracing::info!(
            dispute_id = %dispute.dispute_id,
            settlements = early.len(),
            "Linked settlement that arrived before its dispute"
        );
        self.settle(&dispute.dispute_id, now)
            .map(|settled| settled.unwrap_or(dispute))
    }

    /// 结算事件（重复返回 DuplicateEvent；对应协商 → SETTLED）
    pub fn upsert_settlement(
        &self,
        event: &RemoteEvent,
        payload: &SettlementPayload,
    ) -> Result<Settlement> {
        let now = now_millis();
        let settlement = Settlement {
            event_id: event.event_id.clone(),
            order_id: event.order_id.clone(),
            dispute_ref: payload.dispute_id.clone(),
            linked_dispute_id: None,
            result: payload.result.clone(),
            decision: payload.decision.clone(),
            created_at: now,
        };

        if !self.storage.insert_settlement_if_absent(&settlement)? {
            return Err(SyncError::DuplicateEvent {
                event_id: event.event_id.clone(),
            });
        }

        let Some(dispute_id) = settlement.dispute_ref.as_deref() else {
            tracing::info!(event_id = %event.event_id, order_id = %event.order_id, "Settlement recorded without dispute reference");
            return Ok(settlement);
        };

        if self.storage.get_dispute(dispute_id)?.is_none() {
            tracing::info!(
                event_id = %event.event_id,
                dispute_id = %dispute_id,
                "Settlement arrived before its dispute, will link later"
            );
            return Ok(settlement);
        }

        self.storage.link_settlement(&settlement.event_id, dispute_id)?;
        self.settle(dispute_id, now)?;
        tracing::info!(
            event_id = %event.event_id,
            dispute_id = %dispute_id,
            result = %settlement.result,
            "Dispute settled"
        );

        Ok(self
            .storage
            .get_settlement(&settlement.event_id)?
            .unwrap_or(settlement))
    }

    fn settle(&self, dispute_id: &str, now: i64) -> Result<Option<Dispute>> {
        match self
            .storage
            .update_dispute_if(dispute_id, SETTLEABLE, DisputeStatus::Settled, now, None)?
        {
            ConditionalUpdate::Applied(d) | ConditionalUpdate::Mismatch(d) => Ok(Some(d)),
            ConditionalUpdate::NotFound => Ok(None),
        }
    }

    /// 商家响应：先调用平台，成功后才落库
    pub async fn apply_merchant_response(
        &self,
        dispute_id: &str,
        action: MerchantAction,
    ) -> Result<Dispute> {
        let dispute = self
            .storage
            .get_dispute(dispute_id)?
            .ok_or_else(|| SyncError::DisputeNotFound(dispute_id.to_string()))?;
        if dispute.status != DisputeStatus::Pending {
            return Err(SyncError::InvalidDisputeState {
                dispute_id: dispute_id.to_string(),
                status: dispute.status,
            });
        }

        let now = now_millis();
        if dispute.expires_at <= now {
            self.storage.update_dispute_if(
                dispute_id,
                &[DisputeStatus::Pending],
                DisputeStatus::Expired,
                now,
                None,
            )?;
            return Err(SyncError::InvalidDisputeState {
                dispute_id: dispute_id.to_string(),
                status: DisputeStatus::Expired,
            });
        }

        let tenant_id = dispute
            .tenant_id
            .as_deref()
            .ok_or_else(|| SyncError::UnresolvedTenant(dispute.order_id.clone()))?;

        let api = &self.api;
        match &action {
            MerchantAction::Accept { reason } => {
                let reason = reason.as_deref();
                with_auth_retry(move || api.accept_dispute(tenant_id, dispute_id, reason)).await?
            }
            MerchantAction::Reject { reason } => {
                let reason = reason.as_str();
                with_auth_retry(move || api.reject_dispute(tenant_id, dispute_id, reason)).await?
            }
            MerchantAction::Counter {
                alternative_id,
                amount,
                reason,
            } => {
                let proposal = AlternativeProposal {
                    alternative_id: alternative_id.clone(),
                    amount: *amount,
                    reason: reason.clone(),
                };
                let proposal = &proposal;
                with_auth_retry(move || api.propose_alternative(tenant_id, dispute_id, proposal))
                    .await?
            }
        }

        let next = action.resulting_status();
        match self.storage.update_dispute_if(
            dispute_id,
            &[DisputeStatus::Pending],
            next,
            now_millis(),
            action.note(),
        )? {
            ConditionalUpdate::Applied(updated) => {
                tracing::info!(dispute_id = %dispute_id, status = %next, "Merchant responded to dispute");
                Ok(updated)
            }
            // 平台调用期间结算或过期已先行写入
            ConditionalUpdate::Mismatch(current) => Err(SyncError::InvalidDisputeState {
                dispute_id: dispute_id.to_string(),
                status: current.status,
            }),
            ConditionalUpdate::NotFound => Err(SyncError::DisputeNotFound(dispute_id.to_string())),
        }
    }

    // ========================================================================
    // Expiry
    // ========================================================================

    pub fn expire_overdue(&self) -> Result<Vec<String>> {
        self.expire_overdue_at(now_millis())
    }

    /// 过期仍为 PENDING 的协商，返回过期的协商 ID
    pub fn expire_overdue_at(&self, now: i64) -> Result<Vec<String>> {
        let mut expired = Vec::new();
        for dispute in self.storage.disputes_with_status(DisputeStatus::Pending)? {
            if dispute.expires_at > now {
                continue;
            }
            if let ConditionalUpdate::Applied(_) = self.storage.update_dispute_if(
                &dispute.dispute_id,
                &[DisputeStatus::Pending],
                DisputeStatus::Expired,
                now,
                None,
            )? {
                tracing::info!(dispute_id = %dispute.dispute_id, order_id = %dispute.order_id, "Dispute expired");
                expired.push(dispute.dispute_id);
            }
        }
        Ok(expired)
    }

    /// 周期过期扫描
    pub async fn run_expiry_sweeper(self: Arc<Self>, shutdown: CancellationToken, every: Duration) {
        tracing::info!(interval_secs = every.as_secs(), "Dispute expiry sweeper started");
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.expire_overdue() {
                        tracing::error!(error = %e, "Dispute expiry sweep failed");
                    }
                }
            }
        }
        tracing::info!("Dispute expiry sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ApiCall, TENANT, harness, polled_with_metadata};
    use marketplace_client::MarketplaceError;
    use serde_json::json;
    use shared::marketplace::EventKind;

    fn dispute_event(event_id: &str, dispute_id: &str, expires_at: Option<&str>) -> RemoteEvent {
        let mut metadata = json!({ "disputeId": dispute_id, "handshakeType": "AFTER_DELIVERY" });
        if let Some(at) = expires_at {
            metadata["expiresAt"] = json!(at);
        }
        RemoteEvent::from_polled(
            polled_with_metadata(event_id, "HSD", "A1", metadata),
            Some(TENANT.to_string()),
        )
        .unwrap()
    }

    fn settlement_event(event_id: &str, dispute_id: &str) -> RemoteEvent {
        RemoteEvent::from_polled(
            polled_with_metadata(
                event_id,
                "HSS",
                "A1",
                json!({ "disputeId": dispute_id, "status": "ACCEPTED" }),
            ),
            Some(TENANT.to_string()),
        )
        .unwrap()
    }

    fn open(ledger: &DisputeLedger, event: &RemoteEvent) -> Result<Dispute> {
        let EventKind::DisputeOpened { payload } = &event.kind else {
            panic!("not a dispute event");
        };
        ledger.upsert_dispute(event, payload, event.tenant_id.clone())
    }

    fn settle(ledger: &DisputeLedger, event: &RemoteEvent) -> Result<Settlement> {
        let EventKind::Settlement { payload } = &event.kind else {
            panic!("not a settlement event");
        };
        ledger.upsert_settlement(event, payload)
    }

    #[test]
    fn test_dispute_defaults_to_24h_expiry() {
        let h = harness();
        let before = now_millis();
        let dispute = open(&h.state.disputes, &dispute_event("e1", "d1", None)).unwrap();
        assert_eq!(dispute.status, DisputeStatus::Pending);
        assert_eq!(dispute.tenant_id.as_deref(), Some(TENANT));
        assert!(dispute.expires_at >= before + 86_400_000);
        assert!(dispute.expires_at <= now_millis() + 86_400_000);
    }

    #[test]
    fn test_dispute_uses_event_expiry() {
        let h = harness();
        let dispute = open(
            &h.state.disputes,
            &dispute_event("e1", "d1", Some("2030-01-01T00:00:00Z")),
        )
        .unwrap();
        assert_eq!(dispute.expires_at, 1_893_456_000_000);
    }

    #[test]
    fn test_redelivered_dispute_is_noop() {
        let h = harness();
        let ledger = &h.state.disputes;
        open(ledger, &dispute_event("e1", "d1", None)).unwrap();

        let err = open(ledger, &dispute_event("e1", "d1", None)).unwrap_err();
        assert!(matches!(err, SyncError::DuplicateEvent { .. }));
        // 不同事件 ID 但同一协商
        let err = open(ledger, &dispute_event("e2", "d1", None)).unwrap_err();
        assert!(matches!(err, SyncError::DuplicateEvent { .. }));
        assert_eq!(
            ledger.dispute("d1").unwrap().unwrap().source_event_id,
            "e1"
        );
    }

    #[test]
    fn test_settlement_settles_dispute_once() {
        let h = harness();
        let ledger = &h.state.disputes;
        open(ledger, &dispute_event("e1", "d1", None)).unwrap();

        let settlement = settle(ledger, &settlement_event("s1", "d1")).unwrap();
        assert_eq!(settlement.linked_dispute_id.as_deref(), Some("d1"));
        assert_eq!(settlement.result, "ACCEPTED");
        assert_eq!(
            ledger.dispute("d1").unwrap().unwrap().status,
            DisputeStatus::Settled
        );

        let err = settle(ledger, &settlement_event("s1", "d1")).unwrap_err();
        assert!(matches!(err, SyncError::DuplicateEvent { .. }));
    }

    #[test]
    fn test_settlement_before_dispute_is_linked_later() {
        let h = harness();
        let ledger = &h.state.disputes;
        let early = settle(ledger, &settlement_event("s1", "d9")).unwrap();
        assert!(early.linked_dispute_id.is_none());

        let dispute = open(ledger, &dispute_event("e1", "d9", None)).unwrap();
        assert_eq!(dispute.status, DisputeStatus::Settled);
        assert_eq!(
            ledger
                .settlement("s1")
                .unwrap()
                .unwrap()
                .linked_dispute_id
                .as_deref(),
            Some("d9")
        );
    }

    #[tokio::test]
    async fn test_merchant_response_calls_marketplace_first() {
        let h = harness();
        let ledger = &h.state.disputes;
        open(ledger, &dispute_event("e1", "d1", None)).unwrap();

        let updated = ledger
            .apply_merchant_response(
                "d1",
                MerchantAction::Reject {
                    reason: "item was delivered".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, DisputeStatus::Rejected);
        assert_eq!(updated.response_note.as_deref(), Some("item was delivered"));
        assert!(h
            .api
            .calls()
            .contains(&ApiCall::RejectDispute("d1".into(), "item was delivered".into())));

        // 已响应的协商不能再次响应
        let err = ledger
            .apply_merchant_response("d1", MerchantAction::Accept { reason: None })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::InvalidDisputeState {
                status: DisputeStatus::Rejected,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failed_response_leaves_dispute_pending() {
        let h = harness();
        let ledger = &h.state.disputes;
        open(ledger, &dispute_event("e1", "d1", None)).unwrap();
        h.api.fail_actions(Some(MarketplaceError::Api {
            status: 422,
            body: "alternative not offered".into(),
        }));

        let err = ledger
            .apply_merchant_response(
                "d1",
                MerchantAction::Counter {
                    alternative_id: "alt-1".into(),
                    amount: Some(12.5),
                    reason: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Marketplace(_)));
        assert_eq!(
            ledger.dispute("d1").unwrap().unwrap().status,
            DisputeStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_response_without_tenant_is_unresolved() {
        let h = harness();
        let ledger = &h.state.disputes;
        let event = dispute_event("e1", "d1", None);
        let EventKind::DisputeOpened { payload } = &event.kind else {
            unreachable!()
        };
        ledger.upsert_dispute(&event, payload, None).unwrap();

        let err = ledger
            .apply_merchant_response("d1", MerchantAction::Accept { reason: None })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnresolvedTenant(_)));
        assert_eq!(h.api.count(|c| matches!(c, ApiCall::AcceptDispute(_))), 0);
    }

    #[test]
    fn test_expire_overdue() {
        let h = harness();
        let ledger = &h.state.disputes;
        let dispute = open(ledger, &dispute_event("e1", "d1", None)).unwrap();
        open(ledger, &dispute_event("e2", "d2", Some("2099-01-01T00:00:00Z"))).unwrap();

        assert!(ledger.expire_overdue_at(dispute.expires_at - 1).unwrap().is_empty());
        assert_eq!(
            ledger.expire_overdue_at(dispute.expires_at).unwrap(),
            vec!["d1".to_string()]
        );
        assert!(ledger.expire_overdue_at(dispute.expires_at).unwrap().is_empty());
        assert_eq!(
            ledger.dispute("d2").unwrap().unwrap().status,
            DisputeStatus::Pending
        );
    }
}
