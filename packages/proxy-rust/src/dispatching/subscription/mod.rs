//! Proxy-side subscriptions to attributes and broadcasts.

pub mod manager;
pub mod params;

pub use manager::{SubscriptionKind, SubscriptionManager};
pub use params::{
    AttributeSubscriptionParams, BroadcastParameter, BroadcastSubscriptionParams, ErrorCallback,
    PendingSubscription, ReceiveCallback, SubscribedCallback, SubscriptionListener,
    UnsubscribeParams,
};
