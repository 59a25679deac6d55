// marketplace-client/src/client.rs
// 平台 HTTP 客户端 - 无状态门面，令牌由 CredentialManager 提供

use crate::api::{AlternativeProposal, MarketplaceApi};
use crate::config::MarketplaceConfig;
use crate::credential::CredentialManager;
use crate::error::{MarketplaceError, MarketplaceResult};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use shared::marketplace::{
    CancellationRequest, CourierAssignment, EventAck, OrderDetail, PolledEvent,
};
use std::sync::Arc;

const ORDER_API: &str = "/order/v1.0";
const LOGISTICS_API: &str = "/logistics/v1.0";
const POLLING_MERCHANTS_HEADER: &str = "x-polling-merchants";

#[derive(Serialize)]
struct ReasonBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

/// 平台 HTTP 客户端
pub struct MarketplaceClient {
    client: Client,
    base_url: String,
    credentials: Arc<CredentialManager>,
}

impl MarketplaceClient {
    pub fn new(
        config: &MarketplaceConfig,
        credentials: Arc<CredentialManager>,
    ) -> MarketplaceResult<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            credentials,
        })
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 附加令牌并发送；401 时驱逐令牌
    async fn send(&self, tenant_id: &str, request: RequestBuilder) -> MarketplaceResult<Response> {
        let token = self.credentials.get_valid_token(tenant_id).await?;
        let response = request.bearer_auth(token.as_str()).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = classify_failure(status, body);
        if matches!(err, MarketplaceError::AuthExpired) {
            tracing::warn!(tenant_id = %tenant_id, "Marketplace rejected token, evicting");
            self.credentials.evict(tenant_id).await;
        }
        Err(err)
    }

    async fn post_action<B: Serialize + Sync>(
        &self,
        tenant_id: &str,
        path: &str,
        body: Option<&B>,
    ) -> MarketplaceResult<()> {
        let mut request = self.client.post(self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(tenant_id, request).await?;
        Ok(())
    }

    async fn order_action(&self, tenant_id: &str, order_id: &str, action: &str) -> MarketplaceResult<()> {
        let path = format!("{ORDER_API}/orders/{order_id}/{action}");
        tracing::debug!(tenant_id = %tenant_id, order_id = %order_id, action = %action, "Marketplace order action");
        self.post_action::<()>(tenant_id, &path, None).await
    }
}

/// 非成功响应 → 错误分类
pub fn classify_failure(status: StatusCode, body: String) -> MarketplaceError {
    if status == StatusCode::UNAUTHORIZED {
        return MarketplaceError::AuthExpired;
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return MarketplaceError::Transient(format!("status {status}: {body}"));
    }
    MarketplaceError::Api {
        status: status.as_u16(),
        body,
    }
}

#[async_trait]
impl MarketplaceApi for MarketplaceClient {
    async fn poll_events(
        &self,
        tenant_id: &str,
        merchant_id: &str,
    ) -> MarketplaceResult<Vec<PolledEvent>> {
        let request = self
            .client
            .get(self.url(&format!("{ORDER_API}/events:polling")))
            .header(POLLING_MERCHANTS_HEADER, merchant_id);
        let response = self.send(tenant_id, request).await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn acknowledge_events(
        &self,
        tenant_id: &str,
        event_ids: &[String],
    ) -> MarketplaceResult<()> {
        if event_ids.is_empty() {
            return Ok(());
        }
        let acks: Vec<EventAck> = event_ids
            .iter()
            .map(|id| EventAck { id: id.clone() })
            .collect();
        self.post_action(tenant_id, &format!("{ORDER_API}/events/acknowledgment"), Some(&acks))
            .await
    }

    async fn fetch_order_detail(
        &self,
        tenant_id: &str,
        order_id: &str,
    ) -> MarketplaceResult<OrderDetail> {
        let request = self
            .client
            .get(self.url(&format!("{ORDER_API}/orders/{order_id}")));
        let response = self.send(tenant_id, request).await?;
        Ok(response.json().await?)
    }

    async fn confirm(&self, tenant_id: &str, order_id: &str) -> MarketplaceResult<()> {
        self.order_action(tenant_id, order_id, "confirm").await
    }

    async fn dispatch(&self, tenant_id: &str, order_id: &str) -> MarketplaceResult<()> {
        self.order_action(tenant_id, order_id, "dispatch").await
    }

    async fn mark_ready_for_pickup(
        &self,
        tenant_id: &str,
        order_id: &str,
    ) -> MarketplaceResult<()> {
        self.order_action(tenant_id, order_id, "readyToPickup").await
    }

    async fn request_cancellation(
        &self,
        tenant_id: &str,
        order_id: &str,
        request: &CancellationRequest,
    ) -> MarketplaceResult<()> {
        self.post_action(
            tenant_id,
            &format!("{ORDER_API}/orders/{order_id}/requestCancellation"),
            Some(request),
        )
        .await
    }

    async fn assign_courier(
        &self,
        tenant_id: &str,
        order_id: &str,
        assignment: &CourierAssignment,
    ) -> MarketplaceResult<()> {
        self.post_action(
            tenant_id,
            &format!("{LOGISTICS_API}/orders/{order_id}/assignDriver"),
            Some(assignment),
        )
        .await
    }

    async fn accept_dispute(
        &self,
        tenant_id: &str,
        dispute_id: &str,
        reason: Option<&str>,
    ) -> MarketplaceResult<()> {
        self.post_action(
            tenant_id,
            &format!("{ORDER_API}/disputes/{dispute_id}/accept"),
            Some(&ReasonBody { reason }),
        )
        .await
    }

    async fn reject_dispute(
        &self,
        tenant_id: &str,
        dispute_id: &str,
        reason: &str,
    ) -> MarketplaceResult<()> {
        self.post_action(
            tenant_id,
            &format!("{ORDER_API}/disputes/{dispute_id}/reject"),
            Some(&ReasonBody {
                reason: Some(reason),
            }),
        )
        .await
    }

    async fn propose_alternative(
        &self,
        tenant_id: &str,
        dispute_id: &str,
        proposal: &AlternativeProposal,
    ) -> MarketplaceResult<()> {
        self.post_action(
            tenant_id,
            &format!(
                "{ORDER_API}/disputes/{dispute_id}/alternatives/{}",
                proposal.alternative_id
            ),
            Some(proposal),
        )
        .await
    }
}
