//! Shared types for marketplace orders

pub mod snapshot;
pub mod types;

pub use snapshot::Order;
pub use types::{Coordinates, CourierRef, DeliveryMode, OrderStatus, OrderTiming};
