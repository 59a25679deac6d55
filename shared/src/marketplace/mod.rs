//! Marketplace event and wire types

pub mod event;
pub mod wire;

pub use event::{
    DisputePayload, EventCode, EventKind, EventParseError, EventSource, LifecycleCode,
    RemoteEvent, SettlementPayload,
};
pub use wire::{
    CancellationRequest, CourierAssignment, EventAck, MerchantRef, OrderDetail, OrderSchedule,
    OrderType, PolledEvent, TokenResponse, WebhookEvent,
};
