//! 订单状态机
//!
//! - [`transitions`] - 纯迁移表
//! - [`OrderStateMachine`] - 条件写入 + 副作用

pub mod state_machine;
pub mod transitions;

pub use state_machine::{ImportOutcome, OrderStateMachine, SideEffect, TransitionOutcome};
pub use transitions::{Rejection, Trigger};
