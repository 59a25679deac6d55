//! 按租户的事件轮询

pub mod supervisor;

pub use supervisor::{PollingConfig, PollingSnapshot, PollingSupervisor};
