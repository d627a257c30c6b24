//! `inolink-middleware` – fan-out between the poller and its consumers.
//!
//! # Modules
//!
//! - [`bus`] – ordered, failure-isolated publish/subscribe [`Hub`] with two
//!   delivery styles: same-thread callbacks held by weak reference, and
//!   bounded per-subscriber queues for cross-task consumers.  [`EventBus`]
//!   bundles the reading and lifecycle lanes.

pub mod bus;

pub use bus::{
    DEFAULT_QUEUE_CAPACITY, EventBus, Hub, Observer, QueueReceiver, SubscriptionHandle,
};
