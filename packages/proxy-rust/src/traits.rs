//! Seams between the correlation engine, the dispatcher and the transport.

use conduit_core::messages::{
    BroadcastSubscriptionRequest, Message, MulticastSubscriptionRequest, OneWayRequest, Request,
    SubscriptionRequest, SubscriptionStop,
};
use conduit_core::{DiscoveryEntry, MessagingQos};

use crate::error::{DispatchError, TransportError};

/// Carries encoded envelopes to their recipients.
///
/// Delivery is at most once and unordered; the runtime never relies on more.
pub trait Transport: Send + Sync {
    /// Hands a message to the transport.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the message cannot be accepted.
    fn transmit(&self, message: Message) -> Result<(), TransportError>;

    /// Starts routing publications for `multicast_id` to `subscriber_id`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the receiver cannot be registered.
    fn add_multicast_receiver(
        &self,
        _multicast_id: &str,
        _subscriber_id: &str,
        _provider_id: &str,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`TransportError`] if the receiver cannot be removed.
    fn remove_multicast_receiver(
        &self,
        _multicast_id: &str,
        _subscriber_id: &str,
        _provider_id: &str,
    ) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Addressing shared by every outbound message.
#[derive(Debug, Clone)]
pub struct SendSettings {
    /// Participant id of the sending proxy.
    pub from: String,
    pub to_discovery_entry: DiscoveryEntry,
    pub messaging_qos: MessagingQos,
}

impl SendSettings {
    #[must_use]
    pub fn new(
        from: impl Into<String>,
        to_discovery_entry: DiscoveryEntry,
        messaging_qos: MessagingQos,
    ) -> Self {
        Self {
            from: from.into(),
            to_discovery_entry,
            messaging_qos,
        }
    }
}

/// Either shape of broadcast subscription request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastSubscription {
    Selective(BroadcastSubscriptionRequest),
    Multicast(MulticastSubscriptionRequest),
}

impl BroadcastSubscription {
    #[must_use]
    pub fn subscription_id(&self) -> &str {
        match self {
            Self::Selective(request) => &request.subscription_id,
            Self::Multicast(request) => &request.subscription_id,
        }
    }
}

/// Outbound operations the managers need from the dispatcher.
///
/// Implementations only originate messages; timeouts stay with the callers.
pub trait MessageSender: Send + Sync {
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the message cannot be handed to the transport.
    fn send_request(&self, settings: &SendSettings, request: &Request) -> Result<(), DispatchError>;

    /// # Errors
    ///
    /// Returns [`DispatchError`] if the message cannot be handed to the transport.
    fn send_one_way_request(
        &self,
        settings: &SendSettings,
        request: &OneWayRequest,
    ) -> Result<(), DispatchError>;

    /// # Errors
    ///
    /// Returns [`DispatchError`] if the message cannot be handed to the transport.
    fn send_subscription_request(
        &self,
        settings: &SendSettings,
        request: &SubscriptionRequest,
    ) -> Result<(), DispatchError>;

    /// # Errors
    ///
    /// Returns [`DispatchError`] if the message cannot be handed to the transport.
    fn send_broadcast_subscription_request(
        &self,
        settings: &SendSettings,
        request: &BroadcastSubscription,
    ) -> Result<(), DispatchError>;

    /// # Errors
    ///
    /// Returns [`DispatchError`] if the message cannot be handed to the transport.
    fn send_subscription_stop(
        &self,
        settings: &SendSettings,
        stop: &SubscriptionStop,
    ) -> Result<(), DispatchError>;

    /// # Errors
    ///
    /// Returns [`DispatchError`] if the message cannot be handed to the transport.
    fn send_multicast_subscription_stop(
        &self,
        settings: &SendSettings,
        multicast_id: &str,
        stop: &SubscriptionStop,
    ) -> Result<(), DispatchError>;

    /// Asks the transport to route publications of `multicast_id` to
    /// `subscriber_id`. Called once per receiver, however many local
    /// subscriptions share it.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the transport refuses the receiver.
    fn add_multicast_receiver(
        &self,
        multicast_id: &str,
        subscriber_id: &str,
        provider_id: &str,
    ) -> Result<(), DispatchError>;

    /// # Errors
    ///
    /// Returns [`DispatchError`] if the transport cannot drop the receiver.
    fn remove_multicast_receiver(
        &self,
        multicast_id: &str,
        subscriber_id: &str,
        provider_id: &str,
    ) -> Result<(), DispatchError>;
}
