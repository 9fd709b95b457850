//! Callbacks, registration parameters and the pending-registration future.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use conduit_core::messages::BroadcastFilterParameters;
use conduit_core::{DiscoveryEntry, MessagingQos, RemoteException, SubscriptionQos};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::SubscriptionError;

pub type ReceiveCallback = Arc<dyn Fn(Value) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(RemoteException) + Send + Sync>;
pub type SubscribedCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Application callbacks of one subscription. All are optional.
///
/// `on_receive` gets the attribute value for attribute subscriptions and
/// the full array of broadcast values for broadcasts. `on_error` gets
/// rejected registrations, missed-publication alerts and error publications.
#[derive(Clone, Default)]
pub struct SubscriptionListener {
    on_receive: Option<ReceiveCallback>,
    on_error: Option<ErrorCallback>,
    on_subscribed: Option<SubscribedCallback>,
}

impl std::fmt::Debug for SubscriptionListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionListener")
            .field("on_receive", &self.on_receive.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_subscribed", &self.on_subscribed.is_some())
            .finish()
    }
}

impl SubscriptionListener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_receive(mut self, callback: impl Fn(Value) + Send + Sync + 'static) -> Self {
        self.on_receive = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn on_error(mut self, callback: impl Fn(RemoteException) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn on_subscribed(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_subscribed = Some(Arc::new(callback));
        self
    }

    pub(crate) fn receive(&self, value: Value) {
        if let Some(callback) = &self.on_receive {
            callback(value);
        }
    }

    pub(crate) fn error(&self, error: RemoteException) {
        if let Some(callback) = &self.on_error {
            callback(error);
        }
    }

    pub(crate) fn subscribed(&self, subscription_id: &str) {
        if let Some(callback) = &self.on_subscribed {
            callback(subscription_id);
        }
    }
}

/// Parameters of an attribute subscription.
#[derive(Debug, Clone)]
pub struct AttributeSubscriptionParams {
    pub proxy_id: String,
    pub provider_discovery_entry: DiscoveryEntry,
    pub attribute_name: String,
    /// Declared attribute type, used to augment received values.
    pub attribute_type: String,
    pub qos: SubscriptionQos,
    /// Reuse an existing id to update that subscription in place.
    pub subscription_id: Option<String>,
    pub listener: SubscriptionListener,
}

impl AttributeSubscriptionParams {
    #[must_use]
    pub fn new(
        proxy_id: impl Into<String>,
        provider_discovery_entry: DiscoveryEntry,
        attribute_name: impl Into<String>,
        attribute_type: impl Into<String>,
        qos: SubscriptionQos,
    ) -> Self {
        Self {
            proxy_id: proxy_id.into(),
            provider_discovery_entry,
            attribute_name: attribute_name.into(),
            attribute_type: attribute_type.into(),
            qos,
            subscription_id: None,
            listener: SubscriptionListener::default(),
        }
    }

    #[must_use]
    pub fn with_subscription_id(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }

    #[must_use]
    pub fn with_listener(mut self, listener: SubscriptionListener) -> Self {
        self.listener = listener;
        self
    }
}

/// Output parameter of a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastParameter {
    pub name: String,
    pub type_name: String,
}

impl BroadcastParameter {
    #[must_use]
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Parameters of a selective or multicast broadcast subscription.
///
/// Filter parameters only travel with selective broadcasts; partitions only
/// shape the multicast id of multicast broadcasts. Both are validated either
/// way.
#[derive(Debug, Clone)]
pub struct BroadcastSubscriptionParams {
    pub proxy_id: String,
    pub provider_discovery_entry: DiscoveryEntry,
    pub broadcast_name: String,
    pub broadcast_parameters: Vec<BroadcastParameter>,
    pub selective: bool,
    /// Filter parameter names declared by the broadcast.
    pub declared_filter_parameters: Vec<String>,
    pub filter_parameters: Option<BroadcastFilterParameters>,
    pub partitions: Vec<String>,
    pub qos: SubscriptionQos,
    pub subscription_id: Option<String>,
    pub listener: SubscriptionListener,
}

impl BroadcastSubscriptionParams {
    fn new(
        proxy_id: impl Into<String>,
        provider_discovery_entry: DiscoveryEntry,
        broadcast_name: impl Into<String>,
        qos: SubscriptionQos,
        selective: bool,
    ) -> Self {
        Self {
            proxy_id: proxy_id.into(),
            provider_discovery_entry,
            broadcast_name: broadcast_name.into(),
            broadcast_parameters: Vec::new(),
            selective,
            declared_filter_parameters: Vec::new(),
            filter_parameters: None,
            partitions: Vec::new(),
            qos,
            subscription_id: None,
            listener: SubscriptionListener::default(),
        }
    }

    #[must_use]
    pub fn selective(
        proxy_id: impl Into<String>,
        provider_discovery_entry: DiscoveryEntry,
        broadcast_name: impl Into<String>,
        qos: SubscriptionQos,
    ) -> Self {
        Self::new(proxy_id, provider_discovery_entry, broadcast_name, qos, true)
    }

    #[must_use]
    pub fn multicast(
        proxy_id: impl Into<String>,
        provider_discovery_entry: DiscoveryEntry,
        broadcast_name: impl Into<String>,
        qos: SubscriptionQos,
    ) -> Self {
        Self::new(proxy_id, provider_discovery_entry, broadcast_name, qos, false)
    }

    #[must_use]
    pub fn with_parameters(mut self, parameters: Vec<BroadcastParameter>) -> Self {
        self.broadcast_parameters = parameters;
        self
    }

    #[must_use]
    pub fn with_filter_parameters(
        mut self,
        declared: Vec<String>,
        supplied: BroadcastFilterParameters,
    ) -> Self {
        self.declared_filter_parameters = declared;
        self.filter_parameters = Some(supplied);
        self
    }

    #[must_use]
    pub fn with_partitions(mut self, partitions: Vec<String>) -> Self {
        self.partitions = partitions;
        self
    }

    #[must_use]
    pub fn with_subscription_id(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }

    #[must_use]
    pub fn with_listener(mut self, listener: SubscriptionListener) -> Self {
        self.listener = listener;
        self
    }
}

#[derive(Debug, Clone)]
pub struct UnsubscribeParams {
    pub subscription_id: String,
    /// Overrides the default QoS of the stop message.
    pub messaging_qos: Option<MessagingQos>,
}

impl UnsubscribeParams {
    #[must_use]
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            messaging_qos: None,
        }
    }

    #[must_use]
    pub fn with_messaging_qos(mut self, messaging_qos: MessagingQos) -> Self {
        self.messaging_qos = Some(messaging_qos);
        self
    }
}

pub(crate) type RegistrationOutcome = Result<String, SubscriptionError>;

enum Registration {
    Waiting(oneshot::Receiver<RegistrationOutcome>),
    Done(Option<SubscriptionError>),
}

/// Outcome of a registration: resolves with the subscription id once the
/// provider acknowledges it.
///
/// The subscription exists as soon as the registration call returns; this
/// future only reports how the provider answered.
pub struct PendingSubscription {
    subscription_id: String,
    registration: Registration,
}

impl std::fmt::Debug for PendingSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingSubscription")
            .field("subscription_id", &self.subscription_id)
            .finish_non_exhaustive()
    }
}

impl PendingSubscription {
    pub(crate) fn waiting(subscription_id: String, rx: oneshot::Receiver<RegistrationOutcome>) -> Self {
        Self {
            subscription_id,
            registration: Registration::Waiting(rx),
        }
    }

    pub(crate) fn failed(subscription_id: String, error: SubscriptionError) -> Self {
        Self {
            subscription_id,
            registration: Registration::Done(Some(error)),
        }
    }

    #[must_use]
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }
}

impl Future for PendingSubscription {
    type Output = RegistrationOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let abandoned = || SubscriptionError::Abandoned {
            subscription_id: this.subscription_id.clone(),
        };
        match &mut this.registration {
            Registration::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
                Poll::Ready(Err(_)) => Poll::Ready(Err(abandoned())),
                Poll::Pending => Poll::Pending,
            },
            Registration::Done(error) => Poll::Ready(Err(error.take().unwrap_or_else(abandoned))),
        }
    }
}
