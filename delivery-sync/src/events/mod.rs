//! 事件路由（轮询 + Webhook）

pub mod router;

pub use router::{BatchReport, EventRouter, RouteOutcome};
