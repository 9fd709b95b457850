//! Wire payloads exchanged between proxies and providers.
//!
//! All types use named `MsgPack` serialization (`rmp_serde::to_vec_named()`)
//! with camelCase field names so that peers in other languages can read them.

pub mod envelope;
pub mod request;
pub mod subscription;

pub use envelope::{EnvelopeError, Message, MessageType};
pub use request::{OneWayRequest, Reply, Request};
pub use subscription::{
    BroadcastFilterParameters, BroadcastSubscriptionRequest, FilterParameterError,
    MulticastPublication, MulticastSubscriptionRequest, SubscriptionPublication,
    SubscriptionReply, SubscriptionRequest, SubscriptionStop,
};
