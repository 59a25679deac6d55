//! Shared types for Crab delivery sync
//!
//! Domain types used by both the marketplace client and the sync core:
//! order records, remote marketplace events, dispute/settlement records.

pub mod dispute;
pub mod marketplace;
pub mod order;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

pub use dispute::{Dispute, DisputeStatus, MerchantAction, Settlement};
pub use marketplace::{EventKind, LifecycleCode, RemoteEvent};
pub use order::{Order, OrderStatus};
