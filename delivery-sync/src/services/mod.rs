//! 外部协作方接口

pub mod courier;
pub mod notifier;

pub use courier::{CourierCandidate, CourierDispatcher, LoggingCourierDispatcher};
pub use notifier::{LoggingNotifier, Notification, Notifier, RecipientType};
