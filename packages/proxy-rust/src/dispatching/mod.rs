//! Correlation of requests, replies and subscriptions, and the dispatcher
//! that moves their messages to and from the transport.
//!
//! 1. **Request-reply** (`request_reply`): outbound calls awaiting replies,
//!    inbound calls served by local providers
//! 2. **Subscriptions** (`subscription`): attribute and broadcast
//!    subscriptions with alerting and expiry
//! 3. **Dispatcher** (`dispatcher`): envelopes, wire expiry, inbound routing

pub mod dispatcher;
pub mod request_reply;
pub mod subscription;

pub use dispatcher::{Dispatcher, MAX_EXPIRY_DATE_MS};
pub use request_reply::{ReplyCaller, ReplyOutcome, RequestReplyManager};
pub use subscription::{
    AttributeSubscriptionParams, BroadcastParameter, BroadcastSubscriptionParams,
    PendingSubscription, SubscriptionKind, SubscriptionListener, SubscriptionManager,
    UnsubscribeParams,
};
