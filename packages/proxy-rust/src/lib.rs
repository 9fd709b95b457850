//! Conduit proxy runtime: correlates requests with replies, manages
//! attribute and broadcast subscriptions, and routes envelopes between a
//! transport and local providers.

pub mod config;
pub mod correlation;
pub mod dispatching;
pub mod error;
pub mod provider;
pub mod runtime;
pub mod timer;
pub mod traits;

#[cfg(test)]
mod testing;

pub use config::RuntimeConfig;
pub use dispatching::{
    AttributeSubscriptionParams, BroadcastParameter, BroadcastSubscriptionParams, Dispatcher,
    PendingSubscription, ReplyCaller, RequestReplyManager, SubscriptionListener,
    SubscriptionManager, UnsubscribeParams,
};
pub use error::{DispatchError, ProviderError, ReplyError, SubscriptionError, TransportError};
pub use provider::{Capability, Provider, ProviderAttribute};
pub use runtime::{ProxyRuntime, ProxyRuntimeBuilder, RuntimeState};
pub use timer::{TimerHandle, TokioClock};
pub use traits::{BroadcastSubscription, MessageSender, SendSettings, Transport};
