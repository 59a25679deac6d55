//! 订单状态迁移表（纯函数）
//!
//! ```text
//! scheduled ──activation──► preparing
//! pending ──confirmed──► preparing
//! preparing ──separation_ended(pickup) / ready_to_pickup──► ready_for_pickup
//! preparing ──separation_ended(delivery)──► preparing
//! preparing | ready_for_pickup ──dispatched / courier_assigned──► out_for_delivery
//! ready_for_pickup | out_for_delivery ──concluded──► delivered
//! 任意非终态 ──cancelled──► cancelled
//! ```
//!
//! 终态订单上的任何触发都被拒绝；目标状态等于当前状态视为重复事件。

use shared::marketplace::LifecycleCode;
use shared::order::{DeliveryMode, OrderStatus};
use std::fmt;

/// 迁移触发器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Confirmed,
    SeparationEnded,
    ReadyToPickup,
    Dispatched,
    /// 本地指派骑手
    CourierAssigned,
    /// 平台取消或取消请求
    Cancelled,
    Concluded,
    /// 预约订单到点激活
    Activation,
}

impl Trigger {
    /// 生命周期事件码 → 触发器（`PLACED` 走导入流程，不在此表中）
    pub fn from_lifecycle(code: LifecycleCode) -> Option<Self> {
        match code {
            LifecycleCode::Placed => None,
            LifecycleCode::Confirmed => Some(Trigger::Confirmed),
            LifecycleCode::SeparationStarted => None,
            LifecycleCode::SeparationEnded => Some(Trigger::SeparationEnded),
            LifecycleCode::ReadyToPickup => Some(Trigger::ReadyToPickup),
            LifecycleCode::Dispatched => Some(Trigger::Dispatched),
            LifecycleCode::Concluded => Some(Trigger::Concluded),
            LifecycleCode::CancellationRequested | LifecycleCode::Cancelled => {
                Some(Trigger::Cancelled)
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Confirmed => "confirmed",
            Trigger::SeparationEnded => "separation_ended",
            Trigger::ReadyToPickup => "ready_to_pickup",
            Trigger::Dispatched => "dispatched",
            Trigger::CourierAssigned => "courier_assigned",
            Trigger::Cancelled => "cancelled",
            Trigger::Concluded => "concluded",
            Trigger::Activation => "activation",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 迁移被拒绝的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    AlreadyTerminal,
    Duplicate,
    /// 激活时订单已不在 scheduled
    ScheduleRace,
    Invalid,
}

/// 计算迁移目标状态
pub fn next_status(
    current: OrderStatus,
    trigger: Trigger,
    mode: DeliveryMode,
) -> Result<OrderStatus, Rejection> {
    use OrderStatus::*;

    if trigger == Trigger::Activation {
        return match current {
            Scheduled => Ok(Preparing),
            _ => Err(Rejection::ScheduleRace),
        };
    }
    if current.is_terminal() {
        return Err(Rejection::AlreadyTerminal);
    }

    let target = match (trigger, mode) {
        (Trigger::SeparationEnded, DeliveryMode::Pickup) => ReadyForPickup,
        (Trigger::SeparationEnded, DeliveryMode::Delivery) => {
            // 外送单分拣完成后仍在 preparing，等待骑手
            return match current {
                Preparing => Ok(Preparing),
                _ => Err(Rejection::Invalid),
            };
        }
        (Trigger::Confirmed, _) => Preparing,
        (Trigger::ReadyToPickup, _) => ReadyForPickup,
        (Trigger::Dispatched | Trigger::CourierAssigned, _) => OutForDelivery,
        (Trigger::Concluded, _) => Delivered,
        (Trigger::Cancelled, _) => Cancelled,
        (Trigger::Activation, _) => return Err(Rejection::ScheduleRace),
    };
    if target == current {
        return Err(Rejection::Duplicate);
    }

    let allowed = match trigger {
        Trigger::Confirmed => current == Pending,
        Trigger::SeparationEnded | Trigger::ReadyToPickup => current == Preparing,
        Trigger::Dispatched | Trigger::CourierAssigned => {
            matches!(current, Preparing | ReadyForPickup)
        }
        Trigger::Concluded => matches!(current, ReadyForPickup | OutForDelivery),
        Trigger::Cancelled => true,
        Trigger::Activation => false,
    };

    if allowed {
        Ok(target)
    } else {
        Err(Rejection::Invalid)
    }
}
