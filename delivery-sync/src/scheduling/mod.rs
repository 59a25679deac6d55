//! 预约订单激活服务

pub mod activation;

pub use activation::{ActivationState, ScheduledActivation, ScheduledActivationService, SweepReport};
