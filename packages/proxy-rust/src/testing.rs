//! Test doubles shared by the unit tests of this crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use conduit_core::messages::{
    Message, OneWayRequest, Request, SubscriptionRequest, SubscriptionStop,
};
use conduit_core::{DiscoveryEntry, Version};
use parking_lot::Mutex;

use crate::error::{DispatchError, TransportError};
use crate::traits::{BroadcastSubscription, MessageSender, SendSettings, Transport};

/// Wall-clock start used by tests running on a paused tokio clock.
pub(crate) const EPOCH_MS: u64 = 1_700_000_000_000;

pub(crate) fn provider_entry() -> DiscoveryEntry {
    DiscoveryEntry::new("io.conduit.test", "vehicle/Radio", "provider-1", Version::new(1, 0))
}

/// One call made on a [`RecordingSender`].
#[derive(Debug, Clone)]
pub(crate) enum Sent {
    Request(SendSettings, Request),
    OneWay(SendSettings, OneWayRequest),
    Subscription(SendSettings, SubscriptionRequest),
    Broadcast(SendSettings, BroadcastSubscription),
    Stop(SendSettings, SubscriptionStop),
    MulticastStop(SendSettings, String, SubscriptionStop),
}

impl Sent {
    pub(crate) fn settings(&self) -> &SendSettings {
        match self {
            Self::Request(settings, _)
            | Self::OneWay(settings, _)
            | Self::Subscription(settings, _)
            | Self::Broadcast(settings, _)
            | Self::Stop(settings, _)
            | Self::MulticastStop(settings, _, _) => settings,
        }
    }

    pub(crate) fn is_stop(&self) -> bool {
        matches!(self, Self::Stop(..) | Self::MulticastStop(..))
    }
}

/// Registered `(multicast_id, subscriber_id)` pairs. Removal takes out one
/// matching entry, so unbalanced registrations stay visible.
#[derive(Debug, Default)]
struct Receivers(Mutex<Vec<(String, String)>>);

impl Receivers {
    fn add(&self, multicast_id: &str, subscriber_id: &str) {
        self.0
            .lock()
            .push((multicast_id.to_string(), subscriber_id.to_string()));
    }

    fn remove(&self, multicast_id: &str, subscriber_id: &str) {
        let mut receivers = self.0.lock();
        if let Some(index) = receivers
            .iter()
            .position(|(id, subscriber)| id == multicast_id && subscriber == subscriber_id)
        {
            receivers.remove(index);
        }
    }

    fn snapshot(&self) -> Vec<(String, String)> {
        self.0.lock().clone()
    }
}

/// [`MessageSender`] that records every call. Failing mode refuses
/// messages but still accepts multicast receivers.
#[derive(Debug, Default)]
pub(crate) struct RecordingSender {
    sent: Mutex<Vec<Sent>>,
    receivers: Receivers,
    failing: AtomicBool,
}

impl RecordingSender {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub(crate) fn stops(&self) -> Vec<Sent> {
        self.sent().into_iter().filter(Sent::is_stop).collect()
    }

    pub(crate) fn last(&self) -> Option<Sent> {
        self.sent.lock().last().cloned()
    }

    pub(crate) fn multicast_receivers(&self) -> Vec<(String, String)> {
        self.receivers.snapshot()
    }

    pub(crate) fn fail_sends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn record(&self, sent: Sent) -> Result<(), DispatchError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Closed.into());
        }
        self.sent.lock().push(sent);
        Ok(())
    }
}

impl MessageSender for RecordingSender {
    fn send_request(&self, settings: &SendSettings, request: &Request) -> Result<(), DispatchError> {
        self.record(Sent::Request(settings.clone(), request.clone()))
    }

    fn send_one_way_request(
        &self,
        settings: &SendSettings,
        request: &OneWayRequest,
    ) -> Result<(), DispatchError> {
        self.record(Sent::OneWay(settings.clone(), request.clone()))
    }

    fn send_subscription_request(
        &self,
        settings: &SendSettings,
        request: &SubscriptionRequest,
    ) -> Result<(), DispatchError> {
        self.record(Sent::Subscription(settings.clone(), request.clone()))
    }

    fn send_broadcast_subscription_request(
        &self,
        settings: &SendSettings,
        request: &BroadcastSubscription,
    ) -> Result<(), DispatchError> {
        self.record(Sent::Broadcast(settings.clone(), request.clone()))
    }

    fn send_subscription_stop(
        &self,
        settings: &SendSettings,
        stop: &SubscriptionStop,
    ) -> Result<(), DispatchError> {
        self.record(Sent::Stop(settings.clone(), stop.clone()))
    }

    fn send_multicast_subscription_stop(
        &self,
        settings: &SendSettings,
        multicast_id: &str,
        stop: &SubscriptionStop,
    ) -> Result<(), DispatchError> {
        self.record(Sent::MulticastStop(
            settings.clone(),
            multicast_id.to_string(),
            stop.clone(),
        ))
    }

    fn add_multicast_receiver(
        &self,
        multicast_id: &str,
        subscriber_id: &str,
        _provider_id: &str,
    ) -> Result<(), DispatchError> {
        self.receivers.add(multicast_id, subscriber_id);
        Ok(())
    }

    fn remove_multicast_receiver(
        &self,
        multicast_id: &str,
        subscriber_id: &str,
        _provider_id: &str,
    ) -> Result<(), DispatchError> {
        self.receivers.remove(multicast_id, subscriber_id);
        Ok(())
    }
}

/// [`Transport`] that keeps every transmitted message.
#[derive(Debug, Default)]
pub(crate) struct RecordingTransport {
    messages: Mutex<Vec<Message>>,
    receivers: Receivers,
}

impl RecordingTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    pub(crate) fn take(&self) -> Vec<Message> {
        std::mem::take(&mut *self.messages.lock())
    }

    pub(crate) fn multicast_receivers(&self) -> Vec<(String, String)> {
        self.receivers.snapshot()
    }
}

impl Transport for RecordingTransport {
    fn transmit(&self, message: Message) -> Result<(), TransportError> {
        self.messages.lock().push(message);
        Ok(())
    }

    fn add_multicast_receiver(
        &self,
        multicast_id: &str,
        subscriber_id: &str,
        _provider_id: &str,
    ) -> Result<(), TransportError> {
        self.receivers.add(multicast_id, subscriber_id);
        Ok(())
    }

    fn remove_multicast_receiver(
        &self,
        multicast_id: &str,
        subscriber_id: &str,
        _provider_id: &str,
    ) -> Result<(), TransportError> {
        self.receivers.remove(multicast_id, subscriber_id);
        Ok(())
    }
}
