//! 核心模块：配置、错误、状态组装、后台任务

pub mod config;
pub mod error;
pub mod state;
pub mod tasks;

pub use config::Config;
pub use error::{Result, SyncError};
pub use state::SyncState;
pub use tasks::{BackgroundTasks, TaskKind};
