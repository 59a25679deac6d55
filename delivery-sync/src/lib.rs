//! Delivery Sync - 外卖平台订单同步核心
//!
//! # 架构概述
//!
//! 本地订单库与外卖平台之间的双向同步。平台状态是权威的，但只能通过
//! Webhook 推送和轮询两条不可靠的通道观察；本模块在至少一次投递、令牌过期、
//! 网络抖动和进程重启下保持本地状态、平台状态和预约激活的一致。
//!
//! - **事件路由** (`events`): 去重并分发轮询 / Webhook 事件
//! - **订单状态机** (`orders`): 条件写入 + 副作用（骑手调度、通知、回写平台）
//! - **轮询** (`polling`): 每租户独立循环，带熔断
//! - **预约激活** (`scheduling`): 一次性定时器 + 补偿扫描
//! - **协商台账** (`disputes`): 争议与结算
//!
//! # 模块结构
//!
//! ```text
//! delivery-sync/src/
//! ├── core/          # 配置、错误、状态、后台任务
//! ├── storage.rs     # redb 存储
//! ├── orders/        # 迁移表 + 状态机
//! ├── events/        # 事件路由
//! ├── polling/       # 轮询监督
//! ├── scheduling/    # 预约激活
//! ├── disputes/      # 协商台账
//! ├── services/      # 协作方 trait（骑手调度、通知）
//! ├── tenants.rs     # 租户配置与商户索引
//! └── utils/         # 日志
//! ```

pub mod core;
pub mod disputes;
pub mod events;
pub mod orders;
pub mod polling;
pub mod scheduling;
pub mod services;
pub mod storage;
pub mod tenants;
pub mod utils;

#[cfg(test)]
pub mod test_support;

// Re-export 公共类型
pub use core::{BackgroundTasks, Config, Result, SyncError, SyncState, TaskKind};
pub use disputes::DisputeLedger;
pub use events::{BatchReport, EventRouter, RouteOutcome};
pub use orders::OrderStateMachine;
pub use polling::{PollingSnapshot, PollingSupervisor};
pub use scheduling::ScheduledActivationService;
pub use storage::SyncStorage;
pub use tenants::{TenantConfig, TenantRegistry, load_tenants};

// Re-export logger functions
pub use utils::{init_logger, init_logger_with_file};
