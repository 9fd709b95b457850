//! Conduit core: wire payloads, QoS, remote exceptions and the type registry
//! shared by the proxy runtime and its peers.

pub mod clock;
pub mod exception;
pub mod messages;
pub mod partition;
pub mod qos;
pub mod types;
pub mod typing;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use exception::RemoteException;
pub use partition::{create_multicast_id, validate_partitions, PartitionError};
pub use qos::{
    MessagingQos, MessagingQosEffort, SubscriptionQos, DEFAULT_MESSAGING_TTL_MS,
    MAX_MESSAGING_TTL_MS, NO_EXPIRY_DATE,
};
pub use types::{DiscoveryEntry, Version};
pub use typing::{TypeRegistry, TypingError};
