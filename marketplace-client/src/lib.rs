//! Marketplace Client - 外卖平台 API 客户端
//!
//! - [`CredentialManager`] - 按租户管理 access token，到期前透明刷新
//! - [`MarketplaceApi`] - 平台操作 trait（轮询、订单动作、协商响应）
//! - [`MarketplaceClient`] - 基于 reqwest 的实现

pub mod api;
pub mod client;
pub mod config;
pub mod credential;
pub mod error;

pub use api::{AlternativeProposal, MarketplaceApi, with_auth_retry};
pub use client::MarketplaceClient;
pub use config::MarketplaceConfig;
pub use credential::{
    AccessToken, CredentialManager, HttpTokenExchange, TOKEN_SAFETY_BUFFER, TenantSecrets,
    TokenExchange,
};
pub use error::{MarketplaceError, MarketplaceResult};
