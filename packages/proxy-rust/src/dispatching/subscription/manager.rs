//! Subscription lifecycle: registration, acknowledgement, publication
//! delivery, missed-publication alerts, expiry and teardown.
//!
//! # Timers
//!
//! After a subscription is acknowledged it may carry two timers:
//!
//! - the alert timer (period `alertAfterIntervalMs`) raises
//!   `PublicationMissedException` through `on_error` and re-arms; every
//!   publication restarts it
//! - the expiry timer fires at `expiryDateMs` and disarms the alert timer
//!   for good; the entry itself stays until it is unregistered
//!
//! Both are stored with a timer id. A firing timer acts only if its id is
//! still the one stored on the entry, so unregistering or re-arming is
//! effective immediately even if the old task already woke up.
//!
//! Callbacks always run with the state lock released, so they may register
//! or unregister subscriptions, including their own. Each subscription's
//! callbacks pass through a gate that teardown closes. Once
//! `unregister_subscription` returns, no callback of that subscription runs,
//! whatever thread the timers and publications arrive on.
//!
//! # Multicast
//!
//! A multicast id stays in the index while at least one local subscription
//! references it. The transport receiver for a `(multicast id, proxy)` pair
//! is added with its first subscription and removed with its last, on every
//! teardown path: unregistering, rejection, timeout, failed send, a reused
//! subscription id and shutdown.

use std::cell::Cell;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use conduit_core::messages::{
    BroadcastSubscriptionRequest, MulticastPublication, MulticastSubscriptionRequest,
    SubscriptionPublication, SubscriptionReply, SubscriptionRequest, SubscriptionStop,
};
use conduit_core::{
    create_multicast_id, validate_partitions, ClockSource, DiscoveryEntry, MessagingQos,
    RemoteException, SubscriptionQos, TypeRegistry, TypingError,
};
use parking_lot::{Mutex, ReentrantMutex};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::params::{
    AttributeSubscriptionParams, BroadcastSubscriptionParams, PendingSubscription,
    RegistrationOutcome, SubscriptionListener, UnsubscribeParams,
};
use crate::config::RuntimeConfig;
use crate::correlation::CorrelationTable;
use crate::error::{DispatchError, SubscriptionError};
use crate::timer::TimerHandle;
use crate::traits::{BroadcastSubscription, MessageSender, SendSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    Attribute,
    SelectiveBroadcast,
    MulticastBroadcast,
}

/// How publication values are handed to `on_receive`.
#[derive(Debug, Clone)]
enum Shape {
    /// First value, augmented with the attribute type.
    Attribute { type_name: String },
    /// Whole array, element-wise augmented with the parameter types.
    Broadcast { parameter_types: Vec<String> },
}

struct ArmedTimer {
    id: u64,
    _handle: TimerHandle,
}

/// Admits the callbacks of one subscription until it is closed.
///
/// Callbacks run while holding the gate, and closing waits for a running
/// callback to return. A callback may unregister its own subscription
/// since the lock is reentrant.
#[derive(Clone)]
struct Gate(Arc<ReentrantMutex<Cell<bool>>>);

impl Gate {
    fn open() -> Self {
        Self(Arc::new(ReentrantMutex::new(Cell::new(true))))
    }

    fn close(&self) {
        self.0.lock().set(false);
    }

    /// Runs `callback` unless the gate is closed.
    fn pass(&self, callback: impl FnOnce()) {
        let open = self.0.lock();
        if open.get() {
            callback();
        }
    }
}

/// Transport registration shared by the multicast subscriptions of one
/// proxy on one multicast id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Receiver {
    multicast_id: String,
    subscriber_id: String,
    provider_id: String,
}

struct Subscription {
    kind: SubscriptionKind,
    subscribed_to_name: String,
    proxy_id: String,
    provider_discovery_entry: DiscoveryEntry,
    qos: SubscriptionQos,
    listener: SubscriptionListener,
    gate: Gate,
    shape: Shape,
    multicast_id: Option<String>,
    /// Set once the provider acknowledged the registration.
    acknowledged: bool,
    /// Set once the expiry date passed.
    expired: bool,
    alert: Option<ArmedTimer>,
    expiry: Option<ArmedTimer>,
}

impl Subscription {
    fn receiver(&self) -> Option<Receiver> {
        self.multicast_id.as_ref().map(|multicast_id| Receiver {
            multicast_id: multicast_id.clone(),
            subscriber_id: self.proxy_id.clone(),
            provider_id: self.provider_discovery_entry.participant_id.clone(),
        })
    }
}

/// What a subscription leaving the state still owes outside of it.
#[derive(Debug, Default)]
struct Released {
    /// Multicast id that lost its last local subscriber.
    multicast_id: Option<String>,
    /// Transport receiver that lost its last local subscription.
    receiver: Option<Receiver>,
}

/// Result of [`State::store`].
struct Stored {
    /// Receiver that must be registered with the transport.
    acquired: Option<Receiver>,
    /// Entry previously stored under the same id.
    replaced: Option<(Subscription, Released)>,
}

struct State {
    running: bool,
    subscriptions: HashMap<String, Subscription>,
    multicast_subscribers: HashMap<String, BTreeSet<String>>,
    /// Number of local subscriptions behind each transport receiver.
    receivers: HashMap<Receiver, usize>,
}

impl State {
    fn store(&mut self, subscription_id: &str, subscription: Subscription) -> Stored {
        let mut replaced = self.remove(subscription_id);
        if let Some(multicast_id) = &subscription.multicast_id {
            self.multicast_subscribers
                .entry(multicast_id.clone())
                .or_default()
                .insert(subscription_id.to_string());
        }
        let mut acquired = subscription.receiver().filter(|receiver| self.acquire(receiver));

        if let Some((_, released)) = replaced.as_mut() {
            debug!(subscription_id = %subscription_id, "replacing existing subscription");
            // Handing a multicast id or receiver over to the new entry is
            // neither a release nor a new registration.
            if released.multicast_id.is_some() && released.multicast_id == subscription.multicast_id {
                released.multicast_id = None;
            }
            if released.receiver.is_some() && released.receiver == acquired {
                released.receiver = None;
                acquired = None;
            }
        }
        self.subscriptions
            .insert(subscription_id.to_string(), subscription);
        Stored { acquired, replaced }
    }

    /// Removes a subscription along with its multicast membership and its
    /// share of the transport receiver.
    fn remove(&mut self, subscription_id: &str) -> Option<(Subscription, Released)> {
        let subscription = self.subscriptions.remove(subscription_id)?;
        let mut released = Released::default();
        if let Some(multicast_id) = &subscription.multicast_id {
            if self.unindex(multicast_id, subscription_id) {
                released.multicast_id = Some(multicast_id.clone());
            }
        }
        released.receiver = subscription.receiver().filter(|receiver| self.release(receiver));
        Some((subscription, released))
    }

    /// Returns `true` if the multicast id lost its last subscriber.
    fn unindex(&mut self, multicast_id: &str, subscription_id: &str) -> bool {
        let Some(subscribers) = self.multicast_subscribers.get_mut(multicast_id) else {
            return false;
        };
        subscribers.remove(subscription_id);
        if subscribers.is_empty() {
            self.multicast_subscribers.remove(multicast_id);
            true
        } else {
            false
        }
    }

    /// Returns `true` for the first subscription behind `receiver`.
    fn acquire(&mut self, receiver: &Receiver) -> bool {
        let count = self.receivers.entry(receiver.clone()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Returns `true` once the last subscription behind `receiver` is gone.
    fn release(&mut self, receiver: &Receiver) -> bool {
        match self.receivers.get_mut(receiver) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.receivers.remove(receiver);
                true
            }
            None => false,
        }
    }
}

/// Everything needed to hand a publication to one subscription.
struct Target {
    listener: SubscriptionListener,
    gate: Gate,
    shape: Shape,
}

impl Target {
    fn of(subscription: &Subscription) -> Self {
        Self {
            listener: subscription.listener.clone(),
            gate: subscription.gate.clone(),
            shape: subscription.shape.clone(),
        }
    }
}

struct Shared {
    state: Mutex<State>,
    reply_callers: CorrelationTable<String, oneshot::Sender<RegistrationOutcome>>,
    next_timer_id: AtomicU64,
    sender: Arc<dyn MessageSender>,
    clock: Arc<dyn ClockSource>,
    types: Arc<TypeRegistry>,
    config: RuntimeConfig,
}

impl Shared {
    fn schedule<F>(self: &Arc<Self>, delay_ms: u64, on_fire: F) -> ArmedTimer
    where
        F: FnOnce(&Arc<Self>, u64) + Send + 'static,
    {
        let id = self.next_timer_id.fetch_add(1, Ordering::Relaxed) + 1;
        let shared: Weak<Self> = Arc::downgrade(self);
        let handle = TimerHandle::schedule(Duration::from_millis(delay_ms), move || {
            if let Some(shared) = shared.upgrade() {
                on_fire(&shared, id);
            }
        });
        ArmedTimer {
            id,
            _handle: handle,
        }
    }

    /// Starts a fresh alert window if alerting applies to `subscription`.
    fn restart_alert(self: &Arc<Self>, subscription_id: &str, subscription: &mut Subscription) {
        subscription.alert = None;
        if !subscription.acknowledged || subscription.expired {
            return;
        }
        let Some(interval_ms) = subscription.qos.alert_interval() else {
            return;
        };
        let now = self.clock.now();
        if subscription.qos.has_expiry() && now.saturating_add(interval_ms) >= subscription.qos.expiry_date_ms {
            return;
        }
        let subscription_id = subscription_id.to_string();
        subscription.alert = Some(self.schedule(interval_ms, move |shared, timer_id| {
            shared.on_alert_timer(&subscription_id, timer_id);
        }));
    }

    fn on_alert_timer(self: &Arc<Self>, subscription_id: &str, timer_id: u64) {
        let (listener, gate) = {
            let mut state = self.state.lock();
            let Some(subscription) = state.subscriptions.get_mut(subscription_id) else {
                return;
            };
            if subscription.alert.as_ref().map(|timer| timer.id) != Some(timer_id) {
                return;
            }
            self.restart_alert(subscription_id, subscription);
            (subscription.listener.clone(), subscription.gate.clone())
        };
        debug!(subscription_id = %subscription_id, "publication missed");
        gate.pass(|| listener.error(RemoteException::publication_missed(subscription_id)));
    }

    fn arm_expiry(self: &Arc<Self>, subscription_id: &str, subscription: &mut Subscription) {
        if !subscription.qos.has_expiry() {
            return;
        }
        let delay_ms = subscription
            .qos
            .expiry_date_ms
            .saturating_sub(self.clock.now());
        let subscription_id = subscription_id.to_string();
        subscription.expiry = Some(self.schedule(delay_ms, move |shared, timer_id| {
            shared.on_expiry_timer(&subscription_id, timer_id);
        }));
    }

    fn on_expiry_timer(&self, subscription_id: &str, timer_id: u64) {
        let mut state = self.state.lock();
        let Some(subscription) = state.subscriptions.get_mut(subscription_id) else {
            return;
        };
        if subscription.expiry.as_ref().map(|timer| timer.id) != Some(timer_id) {
            return;
        }
        subscription.expired = true;
        subscription.alert = None;
        subscription.expiry = None;
        debug!(subscription_id = %subscription_id, "subscription expired");
    }

    /// Settles what a subscription that left the state still owes: its
    /// callbacks are cut off, the transport receiver is dropped and, when
    /// `stop` carries a qos, the provider is told to stop.
    ///
    /// A multicast stop goes out only for a multicast id that lost its last
    /// local subscriber.
    fn release(
        &self,
        subscription_id: &str,
        subscription: &Subscription,
        released: Released,
        stop: Option<MessagingQos>,
    ) -> Result<(), DispatchError> {
        subscription.gate.close();

        let sent = match stop {
            Some(messaging_qos) => {
                let settings = SendSettings::new(
                    subscription.proxy_id.clone(),
                    subscription.provider_discovery_entry.clone(),
                    messaging_qos,
                );
                let stop = SubscriptionStop {
                    subscription_id: subscription_id.to_string(),
                };
                match (&subscription.multicast_id, &released.multicast_id) {
                    (Some(_), Some(multicast_id)) => self
                        .sender
                        .send_multicast_subscription_stop(&settings, multicast_id, &stop),
                    (Some(multicast_id), None) => {
                        debug!(
                            subscription_id = %subscription_id,
                            multicast_id = %multicast_id,
                            "multicast still has local subscribers"
                        );
                        Ok(())
                    }
                    (None, _) => self.sender.send_subscription_stop(&settings, &stop),
                }
            }
            None => Ok(()),
        };

        let removed = match &released.receiver {
            Some(receiver) => self.sender.remove_multicast_receiver(
                &receiver.multicast_id,
                &receiver.subscriber_id,
                &receiver.provider_id,
            ),
            None => Ok(()),
        };
        sent.and(removed)
    }

    /// Drops a registration the provider never accepted. No stop is sent.
    fn discard(&self, subscription_id: &str) -> Option<SubscriptionListener> {
        let (subscription, released) = self.state.lock().remove(subscription_id)?;
        if let Err(error) = self.release(subscription_id, &subscription, released, None) {
            warn!(subscription_id = %subscription_id, error = %error, "failed to release multicast receiver");
        }
        Some(subscription.listener)
    }

    fn shape(&self, shape: &Shape, response: Vec<Value>) -> Result<Value, TypingError> {
        match shape {
            Shape::Attribute { type_name } => {
                let value = response.into_iter().next().unwrap_or(Value::Null);
                self.types.augment_types(value, Some(type_name))
            }
            Shape::Broadcast { parameter_types } => response
                .into_iter()
                .enumerate()
                .map(|(i, value)| {
                    self.types
                        .augment_types(value, parameter_types.get(i).map(String::as_str))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
        }
    }

    /// Hands one publication to a listener.
    fn deliver(
        &self,
        target: &Target,
        response: Option<Vec<Value>>,
        error: Option<RemoteException>,
    ) -> Result<(), SubscriptionError> {
        if let Some(error) = error {
            target.gate.pass(|| target.listener.error(error));
            return Ok(());
        }
        let value = self.shape(&target.shape, response.unwrap_or_default())?;
        target.gate.pass(|| target.listener.receive(value));
        Ok(())
    }
}

/// Owns every subscription of one runtime.
pub struct SubscriptionManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("SubscriptionManager")
            .field("running", &state.running)
            .field("subscriptions", &state.subscriptions.len())
            .field("multicast_ids", &state.multicast_subscribers.len())
            .field("pending_registrations", &self.shared.reply_callers)
            .finish()
    }
}

fn new_subscription_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl SubscriptionManager {
    #[must_use]
    pub fn new(
        sender: Arc<dyn MessageSender>,
        clock: Arc<dyn ClockSource>,
        types: Arc<TypeRegistry>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    running: true,
                    subscriptions: HashMap::new(),
                    multicast_subscribers: HashMap::new(),
                    receivers: HashMap::new(),
                }),
                reply_callers: CorrelationTable::new(),
                next_timer_id: AtomicU64::new(0),
                sender,
                clock,
                types,
                config,
            }),
        }
    }

    /// Messaging ttl of a subscription request: the time left until the
    /// subscription expires, or the ceiling if it never does.
    #[must_use]
    pub fn calculate_ttl(&self, qos: &SubscriptionQos) -> u64 {
        let max_ttl_ms = self.shared.config.max_messaging_ttl_ms;
        if !qos.has_expiry() {
            return max_ttl_ms;
        }
        qos.expiry_date_ms
            .saturating_sub(self.shared.clock.now())
            .min(max_ttl_ms)
    }

    /// Subscribes to attribute changes.
    ///
    /// The subscription is stored and the request sent before this returns;
    /// the returned future settles with the provider's answer.
    pub fn register_subscription(&self, params: AttributeSubscriptionParams) -> PendingSubscription {
        let subscription_id = params.subscription_id.unwrap_or_else(new_subscription_id);
        let request = SubscriptionRequest {
            subscription_id: subscription_id.clone(),
            subscribed_to_name: params.attribute_name.clone(),
            qos: params.qos.clone(),
        };
        let subscription = Subscription {
            kind: SubscriptionKind::Attribute,
            subscribed_to_name: params.attribute_name,
            proxy_id: params.proxy_id,
            provider_discovery_entry: params.provider_discovery_entry,
            qos: params.qos,
            listener: params.listener,
            gate: Gate::open(),
            shape: Shape::Attribute {
                type_name: params.attribute_type,
            },
            multicast_id: None,
            acknowledged: false,
            expired: false,
            alert: None,
            expiry: None,
        };
        self.start(subscription_id, subscription, |sender, settings| {
            sender.send_subscription_request(settings, &request)
        })
    }

    /// Subscribes to a selective or multicast broadcast.
    ///
    /// Invalid partitions or filter parameters fail the returned future
    /// without any message being sent. A multicast subscription joins the
    /// multicast index immediately, before the provider answers.
    pub fn register_broadcast_subscription(
        &self,
        params: BroadcastSubscriptionParams,
    ) -> PendingSubscription {
        let subscription_id = params.subscription_id.unwrap_or_else(new_subscription_id);

        if let Err(error) = validate_partitions(&params.partitions) {
            return PendingSubscription::failed(subscription_id, error.into());
        }
        if let Some(filter_parameters) = &params.filter_parameters {
            if let Err(error) = filter_parameters.validate(&params.declared_filter_parameters) {
                return PendingSubscription::failed(subscription_id, error.into());
            }
        }

        let (kind, multicast_id, request) = if params.selective {
            let request = BroadcastSubscription::Selective(BroadcastSubscriptionRequest {
                subscription_id: subscription_id.clone(),
                subscribed_to_name: params.broadcast_name.clone(),
                qos: params.qos.clone(),
                filter_parameters: params.filter_parameters,
                partitions: params.partitions,
            });
            (SubscriptionKind::SelectiveBroadcast, None, request)
        } else {
            let multicast_id = create_multicast_id(
                &params.provider_discovery_entry.participant_id,
                &params.broadcast_name,
                &params.partitions,
            );
            let request = BroadcastSubscription::Multicast(MulticastSubscriptionRequest {
                subscription_id: subscription_id.clone(),
                subscribed_to_name: params.broadcast_name.clone(),
                qos: params.qos.clone(),
                multicast_id: multicast_id.clone(),
            });
            (SubscriptionKind::MulticastBroadcast, Some(multicast_id), request)
        };

        let subscription = Subscription {
            kind,
            subscribed_to_name: params.broadcast_name,
            proxy_id: params.proxy_id,
            provider_discovery_entry: params.provider_discovery_entry,
            qos: params.qos,
            listener: params.listener,
            gate: Gate::open(),
            shape: Shape::Broadcast {
                parameter_types: params
                    .broadcast_parameters
                    .into_iter()
                    .map(|parameter| parameter.type_name)
                    .collect(),
            },
            multicast_id,
            acknowledged: false,
            expired: false,
            alert: None,
            expiry: None,
        };
        self.start(subscription_id, subscription, |sender, settings| {
            sender.send_broadcast_subscription_request(settings, &request)
        })
    }

    fn start<F>(&self, subscription_id: String, subscription: Subscription, send: F) -> PendingSubscription
    where
        F: FnOnce(&dyn MessageSender, &SendSettings) -> Result<(), DispatchError>,
    {
        let ttl_ms = self.calculate_ttl(&subscription.qos);
        let settings = SendSettings::new(
            subscription.proxy_id.clone(),
            subscription.provider_discovery_entry.clone(),
            MessagingQos::with_ttl(ttl_ms),
        );

        let stored = {
            let mut state = self.shared.state.lock();
            if !state.running {
                return PendingSubscription::failed(subscription_id, SubscriptionError::ShutDown);
            }
            state.store(&subscription_id, subscription)
        };

        // The old registration is settled before the new request goes out.
        if let Some((replaced, released)) = stored.replaced {
            let stop = released
                .multicast_id
                .is_some()
                .then(|| MessagingQos::with_ttl(self.shared.config.default_messaging_ttl_ms));
            if let Err(error) = self.shared.release(&subscription_id, &replaced, released, stop) {
                warn!(subscription_id = %subscription_id, error = %error, "failed to release replaced subscription");
            }
        }
        if let Some(receiver) = stored.acquired {
            if let Err(error) = self.shared.sender.add_multicast_receiver(
                &receiver.multicast_id,
                &receiver.subscriber_id,
                &receiver.provider_id,
            ) {
                // Nothing to remove from the transport, only local state.
                let removed = self.shared.state.lock().remove(&subscription_id);
                if let Some((subscription, _)) = removed {
                    subscription.gate.close();
                }
                return PendingSubscription::failed(subscription_id, error.into());
            }
        }

        let (tx, rx) = oneshot::channel();
        let shared = Arc::downgrade(&self.shared);
        self.shared.reply_callers.insert(
            subscription_id.clone(),
            tx,
            Duration::from_millis(ttl_ms),
            move |subscription_id, tx: oneshot::Sender<RegistrationOutcome>| {
                if let Some(shared) = shared.upgrade() {
                    shared.discard(&subscription_id);
                }
                warn!(subscription_id = %subscription_id, ttl_ms, "subscription request timed out");
                let _ = tx.send(Err(SubscriptionError::Timeout {
                    subscription_id,
                    ttl_ms,
                }));
            },
        );

        if let Err(error) = send(self.shared.sender.as_ref(), &settings) {
            self.shared.reply_callers.take(&subscription_id);
            self.shared.discard(&subscription_id);
            return PendingSubscription::failed(subscription_id, error.into());
        }
        PendingSubscription::waiting(subscription_id, rx)
    }

    /// Completes a pending registration. Replies for unknown or already
    /// settled registrations are dropped.
    pub fn handle_subscription_reply(&self, reply: SubscriptionReply) {
        let subscription_id = reply.subscription_id;
        let Some(tx) = self.shared.reply_callers.take(&subscription_id) else {
            debug!(subscription_id = %subscription_id, "dropping subscription reply without pending registration");
            return;
        };

        if let Some(error) = reply.error {
            let exception = match error {
                RemoteException::Subscription { .. } => error,
                other => RemoteException::subscription(&subscription_id, other.detail_message()),
            };
            let listener = self.shared.discard(&subscription_id);
            info!(subscription_id = %subscription_id, error = %exception, "subscription rejected");
            let _ = tx.send(Err(SubscriptionError::Rejected(exception.clone())));
            if let Some(listener) = listener {
                listener.error(exception);
            }
            return;
        }

        let target = {
            let mut state = self.shared.state.lock();
            state.subscriptions.get_mut(&subscription_id).map(|subscription| {
                subscription.acknowledged = true;
                self.shared.arm_expiry(&subscription_id, subscription);
                self.shared.restart_alert(&subscription_id, subscription);
                Target::of(subscription)
            })
        };
        let _ = tx.send(Ok(subscription_id.clone()));
        if let Some(target) = target {
            target.gate.pass(|| target.listener.subscribed(&subscription_id));
        }
    }

    /// Delivers a publication addressed to one subscription.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::UnknownSubscription`] if no such subscription
    /// exists, which means the peer violated the protocol;
    /// [`SubscriptionError::Typing`] if the values do not fit the declared
    /// types.
    pub fn handle_publication(&self, publication: SubscriptionPublication) -> Result<(), SubscriptionError> {
        let subscription_id = publication.subscription_id;
        let target = {
            let mut state = self.shared.state.lock();
            let Some(subscription) = state.subscriptions.get_mut(&subscription_id) else {
                return Err(SubscriptionError::UnknownSubscription { subscription_id });
            };
            self.shared.restart_alert(&subscription_id, subscription);
            Target::of(subscription)
        };
        self.shared
            .deliver(&target, publication.response, publication.error)
    }

    /// Delivers a multicast publication to every local subscriber of its
    /// multicast id, each receiving the full value array.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::UnknownMulticast`] if nobody subscribed to the
    /// multicast id; otherwise the first delivery error, after all
    /// subscribers were served.
    pub fn handle_multicast_publication(&self, publication: MulticastPublication) -> Result<(), SubscriptionError> {
        let subscribers: Vec<String> = {
            let state = self.shared.state.lock();
            let Some(subscribers) = state.multicast_subscribers.get(&publication.multicast_id) else {
                return Err(SubscriptionError::UnknownMulticast {
                    multicast_id: publication.multicast_id,
                });
            };
            subscribers.iter().cloned().collect()
        };

        let mut first_error = None;
        for subscription_id in subscribers {
            // Earlier callbacks may have unregistered later subscribers.
            let target = {
                let mut state = self.shared.state.lock();
                state.subscriptions.get_mut(&subscription_id).map(|subscription| {
                    self.shared.restart_alert(&subscription_id, subscription);
                    Target::of(subscription)
                })
            };
            let Some(target) = target else {
                continue;
            };
            if let Err(error) = self.shared.deliver(
                &target,
                publication.response.clone(),
                publication.error.clone(),
            ) {
                warn!(subscription_id = %subscription_id, error = %error, "multicast delivery failed");
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Cancels a subscription's timers, forgets it and tells the provider.
    ///
    /// A multicast subscription only sends a stop once the last local
    /// subscriber of its multicast id is gone.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::ShutDown`] after shutdown,
    /// [`SubscriptionError::UnknownSubscription`] for an unknown id, or the
    /// dispatch error of the stop message. The subscription is gone in the
    /// last case.
    pub fn unregister_subscription(&self, params: UnsubscribeParams) -> Result<(), SubscriptionError> {
        let UnsubscribeParams {
            subscription_id,
            messaging_qos,
        } = params;

        let (subscription, released) = {
            let mut state = self.shared.state.lock();
            if !state.running {
                return Err(SubscriptionError::ShutDown);
            }
            state
                .remove(&subscription_id)
                .ok_or_else(|| SubscriptionError::UnknownSubscription {
                    subscription_id: subscription_id.clone(),
                })?
        };
        // A registration still in flight is abandoned.
        self.shared.reply_callers.take(&subscription_id);

        let messaging_qos = messaging_qos
            .unwrap_or_else(|| MessagingQos::with_ttl(self.shared.config.default_messaging_ttl_ms));
        self.shared
            .release(&subscription_id, &subscription, released, Some(messaging_qos))?;
        debug!(
            subscription_id = %subscription_id,
            kind = ?subscription.kind,
            subscribed_to_name = %subscription.subscribed_to_name,
            "unsubscribed"
        );
        Ok(())
    }

    /// Unregisters every subscription. Returns how many were stopped.
    pub fn terminate_subscriptions(&self) -> usize {
        let subscription_ids: Vec<String> = self.shared.state.lock().subscriptions.keys().cloned().collect();
        let mut stopped = 0;
        for subscription_id in subscription_ids {
            match self.unregister_subscription(UnsubscribeParams::new(subscription_id.clone())) {
                Ok(()) => stopped += 1,
                Err(SubscriptionError::UnknownSubscription { .. }) => {}
                Err(error) => {
                    warn!(subscription_id = %subscription_id, error = %error, "failed to terminate subscription");
                }
            }
        }
        stopped
    }

    #[must_use]
    pub fn has_subscription(&self, subscription_id: &str) -> bool {
        self.shared
            .state
            .lock()
            .subscriptions
            .contains_key(subscription_id)
    }

    #[must_use]
    pub fn subscription_kind(&self, subscription_id: &str) -> Option<SubscriptionKind> {
        self.shared
            .state
            .lock()
            .subscriptions
            .get(subscription_id)
            .map(|subscription| subscription.kind)
    }

    #[must_use]
    pub fn has_multicast_subscriptions(&self) -> bool {
        !self.shared.state.lock().multicast_subscribers.is_empty()
    }

    #[must_use]
    pub fn has_open_subscriptions(&self) -> bool {
        let state = self.shared.state.lock();
        !state.subscriptions.is_empty()
            || !state.multicast_subscribers.is_empty()
            || !self.shared.reply_callers.is_empty()
    }

    /// Cancels every timer, drops every subscription and rejects pending
    /// registrations. Later registrations fail and unregistering errors.
    pub fn shutdown(&self) {
        let (dropped, receivers) = {
            let mut state = self.shared.state.lock();
            state.running = false;
            state.multicast_subscribers.clear();
            (
                std::mem::take(&mut state.subscriptions),
                std::mem::take(&mut state.receivers),
            )
        };
        debug!(subscriptions = dropped.len(), "subscription manager shut down");
        for subscription in dropped.into_values() {
            subscription.gate.close();
        }
        for receiver in receivers.into_keys() {
            if let Err(error) = self.shared.sender.remove_multicast_receiver(
                &receiver.multicast_id,
                &receiver.subscriber_id,
                &receiver.provider_id,
            ) {
                warn!(multicast_id = %receiver.multicast_id, error = %error, "failed to release multicast receiver");
            }
        }
        for (_, tx) in self.shared.reply_callers.drain() {
            let _ = tx.send(Err(SubscriptionError::ShutDown));
        }
    }
}
