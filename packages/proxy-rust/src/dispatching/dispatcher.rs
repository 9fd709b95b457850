//! Message routing between the transport and the two managers.
//!
//! Outbound, the [`Dispatcher`] wraps payloads into [`Message`] envelopes
//! and stamps their wire expiry. Inbound, it drops expired messages and
//! routes the rest by [`MessageType`].
//!
//! Expiry rules:
//!
//! - freshly originated messages expire at `now + ttl + ttl_uplift_ms`
//! - replies to an inbound message reuse its expiry verbatim
//! - publications add the uplift to the expiry computed by the publisher
//!
//! The uplift only ever affects the envelope. Local timers are armed by the
//! managers from the caller's ttl.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use conduit_core::messages::{
    Message, MessageType, MulticastPublication, OneWayRequest, Reply, Request, SubscriptionPublication,
    SubscriptionReply, SubscriptionRequest, SubscriptionStop,
};
use conduit_core::ClockSource;
use serde::Serialize;
use tracing::{debug, error, info_span, warn};

use super::request_reply::RequestReplyManager;
use super::subscription::SubscriptionManager;
use crate::error::{DispatchError, SubscriptionError};
use crate::traits::{BroadcastSubscription, MessageSender, SendSettings, Transport};

/// Largest expiry date representable by peers using signed 64-bit time.
pub const MAX_EXPIRY_DATE_MS: u64 = i64::MAX.unsigned_abs();

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn ClockSource>,
    ttl_uplift_ms: u64,
    request_reply_manager: ArcSwapOption<RequestReplyManager>,
    subscription_manager: ArcSwapOption<SubscriptionManager>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("ttl_uplift_ms", &self.ttl_uplift_ms)
            .field("request_reply_manager", &self.request_reply_manager.load().is_some())
            .field("subscription_manager", &self.subscription_manager.load().is_some())
            .finish_non_exhaustive()
    }
}

fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Dispatcher {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, clock: Arc<dyn ClockSource>, ttl_uplift_ms: u64) -> Self {
        Self {
            transport,
            clock,
            ttl_uplift_ms,
            request_reply_manager: ArcSwapOption::empty(),
            subscription_manager: ArcSwapOption::empty(),
        }
    }

    pub fn register_request_reply_manager(&self, manager: Arc<RequestReplyManager>) {
        self.request_reply_manager.store(Some(manager));
    }

    pub fn register_subscription_manager(&self, manager: Arc<SubscriptionManager>) {
        self.subscription_manager.store(Some(manager));
    }

    /// Releases both managers. Inbound messages fail with
    /// [`DispatchError::NoManager`] afterwards.
    pub fn shutdown(&self) {
        self.request_reply_manager.store(None);
        self.subscription_manager.store(None);
        debug!("dispatcher shut down");
    }

    /// Adds the uplift to an expiry date.
    #[must_use]
    pub fn uplift(&self, expiry_date_ms: u64) -> u64 {
        expiry_date_ms
            .saturating_add(self.ttl_uplift_ms)
            .min(MAX_EXPIRY_DATE_MS)
    }

    fn fresh_expiry(&self, ttl_ms: u64) -> u64 {
        self.uplift(self.clock.now().saturating_add(ttl_ms))
    }

    fn request_reply_manager(&self) -> Result<Arc<RequestReplyManager>, DispatchError> {
        self.request_reply_manager
            .load_full()
            .ok_or(DispatchError::NoManager("request-reply manager"))
    }

    fn subscription_manager(&self) -> Result<Arc<SubscriptionManager>, DispatchError> {
        self.subscription_manager
            .load_full()
            .ok_or(DispatchError::NoManager("subscription manager"))
    }

    // -- outbound -----------------------------------------------------------

    fn originate<T: Serialize>(
        &self,
        message_type: MessageType,
        settings: &SendSettings,
        payload: &T,
    ) -> Result<(), DispatchError> {
        let to = &settings.to_discovery_entry.participant_id;
        let message = Message::new(new_message_id(), message_type, &settings.from, to, payload)?
            .with_expiry_date(self.fresh_expiry(settings.messaging_qos.ttl_ms))
            .with_qos(&settings.messaging_qos)
            .local(settings.to_discovery_entry.is_local);
        self.transmit(message)
    }

    /// Builds the answer to `inbound`, addressed back to its sender and
    /// expiring with it.
    fn answer<T: Serialize>(
        &self,
        inbound: &Message,
        message_type: MessageType,
        payload: &T,
    ) -> Result<(), DispatchError> {
        let message = Message::new(new_message_id(), message_type, &inbound.to, &inbound.from, payload)?
            .with_expiry_date(inbound.expiry_date_ms)
            .local(inbound.is_local);
        self.transmit(message)
    }

    fn transmit(&self, message: Message) -> Result<(), DispatchError> {
        let span = info_span!(
            "dispatch",
            message_type = ?message.message_type,
            from = %message.from,
            to = %message.to,
        );
        let _entered = span.enter();
        debug!(message_id = %message.id, expiry_date_ms = message.expiry_date_ms, "transmitting");
        self.transport.transmit(message)?;
        Ok(())
    }

    /// Answers an inbound request.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the reply cannot be encoded or transmitted.
    pub fn send_reply(&self, request: &Message, reply: &Reply) -> Result<(), DispatchError> {
        self.answer(request, MessageType::Reply, reply)
    }

    /// Answers an inbound subscription request on behalf of a local provider.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the reply cannot be encoded or transmitted.
    pub fn send_subscription_reply(
        &self,
        request: &Message,
        reply: &SubscriptionReply,
    ) -> Result<(), DispatchError> {
        self.answer(request, MessageType::SubscriptionReply, reply)
    }

    /// Sends a publication whose expiry the publisher already computed.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the message cannot be encoded or transmitted.
    pub fn send_publication(
        &self,
        from: &str,
        to: &str,
        expiry_date_ms: u64,
        publication: &SubscriptionPublication,
    ) -> Result<(), DispatchError> {
        let message = Message::new(new_message_id(), MessageType::Publication, from, to, publication)?
            .with_expiry_date(self.uplift(expiry_date_ms));
        self.transmit(message)
    }

    /// Sends a multicast publication, addressed to its multicast id.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the message cannot be encoded or transmitted.
    pub fn send_multicast_publication(
        &self,
        from: &str,
        expiry_date_ms: u64,
        publication: &MulticastPublication,
    ) -> Result<(), DispatchError> {
        let message = Message::new(
            new_message_id(),
            MessageType::Multicast,
            from,
            &publication.multicast_id,
            publication,
        )?
        .with_expiry_date(self.uplift(expiry_date_ms));
        self.transmit(message)
    }

    // -- inbound ------------------------------------------------------------

    /// Routes one inbound message.
    ///
    /// Requests are answered through [`send_reply`](Self::send_reply) before
    /// this returns.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Expired`] if the message expired in transit
    /// - [`DispatchError::Envelope`] if the payload does not match its type
    /// - [`DispatchError::NoManager`] if the responsible manager is gone
    /// - [`DispatchError::Rejected`] for publications nobody subscribed to
    /// - [`DispatchError::Unroutable`] for provider-side subscription traffic
    pub async fn receive(&self, message: Message) -> Result<(), DispatchError> {
        if message.expiry_date_ms < self.clock.now() {
            warn!(
                message_id = %message.id,
                message_type = ?message.message_type,
                expiry_date_ms = message.expiry_date_ms,
                "dropping expired message"
            );
            return Err(DispatchError::Expired {
                message_id: message.id,
                expiry_date_ms: message.expiry_date_ms,
            });
        }

        match message.message_type {
            MessageType::Request => {
                let manager = self.request_reply_manager()?;
                let request: Request = message.payload()?;
                let reply = manager.handle_request(&message.to, request).await;
                self.send_reply(&message, &reply)
            }
            MessageType::OneWay => {
                let manager = self.request_reply_manager()?;
                let request: OneWayRequest = message.payload()?;
                if let Err(exception) = manager.handle_one_way_request(&message.to, request).await {
                    warn!(message_id = %message.id, error = %exception, "one-way request failed");
                }
                Ok(())
            }
            MessageType::Reply => {
                self.request_reply_manager()?.handle_reply(message.payload()?);
                Ok(())
            }
            MessageType::SubscriptionReply => {
                self.subscription_manager()?
                    .handle_subscription_reply(message.payload()?);
                Ok(())
            }
            MessageType::Publication => {
                let publication: SubscriptionPublication = message.payload()?;
                self.subscription_manager()?
                    .handle_publication(publication)
                    .map_err(|error| Self::rejected(&message, &error))
            }
            MessageType::Multicast => {
                let publication: MulticastPublication = message.payload()?;
                self.subscription_manager()?
                    .handle_multicast_publication(publication)
                    .map_err(|error| Self::rejected(&message, &error))
            }
            message_type @ (MessageType::SubscriptionRequest
            | MessageType::BroadcastSubscriptionRequest
            | MessageType::MulticastSubscriptionRequest
            | MessageType::SubscriptionStop) => {
                warn!(message_id = %message.id, message_type = ?message_type, "no publication subsystem for message");
                Err(DispatchError::Unroutable { message_type })
            }
        }
    }

    fn rejected(message: &Message, error: &SubscriptionError) -> DispatchError {
        error!(
            message_id = %message.id,
            message_type = ?message.message_type,
            error = %error,
            "publication rejected"
        );
        DispatchError::Rejected {
            message_type: message.message_type,
            message_id: message.id.clone(),
            reason: error.to_string(),
        }
    }
}

impl MessageSender for Dispatcher {
    fn send_request(&self, settings: &SendSettings, request: &Request) -> Result<(), DispatchError> {
        self.originate(MessageType::Request, settings, request)
    }

    fn send_one_way_request(
        &self,
        settings: &SendSettings,
        request: &OneWayRequest,
    ) -> Result<(), DispatchError> {
        self.originate(MessageType::OneWay, settings, request)
    }

    fn send_subscription_request(
        &self,
        settings: &SendSettings,
        request: &SubscriptionRequest,
    ) -> Result<(), DispatchError> {
        self.originate(MessageType::SubscriptionRequest, settings, request)
    }

    fn send_broadcast_subscription_request(
        &self,
        settings: &SendSettings,
        request: &BroadcastSubscription,
    ) -> Result<(), DispatchError> {
        match request {
            BroadcastSubscription::Selective(request) => {
                self.originate(MessageType::BroadcastSubscriptionRequest, settings, request)
            }
            BroadcastSubscription::Multicast(request) => {
                self.originate(MessageType::MulticastSubscriptionRequest, settings, request)
            }
        }
    }

    fn send_subscription_stop(
        &self,
        settings: &SendSettings,
        stop: &SubscriptionStop,
    ) -> Result<(), DispatchError> {
        self.originate(MessageType::SubscriptionStop, settings, stop)
    }

    fn send_multicast_subscription_stop(
        &self,
        settings: &SendSettings,
        multicast_id: &str,
        stop: &SubscriptionStop,
    ) -> Result<(), DispatchError> {
        debug!(multicast_id = %multicast_id, subscription_id = %stop.subscription_id, "stopping multicast");
        self.originate(MessageType::SubscriptionStop, settings, stop)
    }

    fn add_multicast_receiver(
        &self,
        multicast_id: &str,
        subscriber_id: &str,
        provider_id: &str,
    ) -> Result<(), DispatchError> {
        self.transport
            .add_multicast_receiver(multicast_id, subscriber_id, provider_id)?;
        Ok(())
    }

    fn remove_multicast_receiver(
        &self,
        multicast_id: &str,
        subscriber_id: &str,
        provider_id: &str,
    ) -> Result<(), DispatchError> {
        self.transport
            .remove_multicast_receiver(multicast_id, subscriber_id, provider_id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use conduit_core::messages::MulticastSubscriptionRequest;
    use conduit_core::{ManualClock, MessagingQos, RemoteException, SubscriptionQos, TypeRegistry};
    use proptest::prelude::*;
    use serde_json::{json, Value};

    use super::*;
    use crate::config::RuntimeConfig;
    use crate::error::ProviderError;
    use crate::provider::Provider;
    use crate::testing::{provider_entry, RecordingTransport, EPOCH_MS};

    const UPLIFT_MS: u64 = 500;

    struct Fixture {
        dispatcher: Arc<Dispatcher>,
        transport: Arc<RecordingTransport>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let transport = RecordingTransport::new();
        let clock = Arc::new(ManualClock::new(EPOCH_MS));
        let dispatcher = Arc::new(Dispatcher::new(transport.clone(), clock.clone(), UPLIFT_MS));
        Fixture {
            dispatcher,
            transport,
            clock,
        }
    }

    fn settings(ttl_ms: u64) -> SendSettings {
        SendSettings::new("proxy-1", provider_entry(), MessagingQos::with_ttl(ttl_ms))
    }

    fn with_request_reply(fixture: &Fixture) -> Arc<RequestReplyManager> {
        let manager = Arc::new(RequestReplyManager::new(
            fixture.dispatcher.clone(),
            Arc::new(TypeRegistry::new()),
        ));
        fixture.dispatcher.register_request_reply_manager(Arc::clone(&manager));
        manager
    }

    fn with_subscriptions(fixture: &Fixture) -> Arc<SubscriptionManager> {
        let manager = Arc::new(SubscriptionManager::new(
            fixture.dispatcher.clone(),
            fixture.clock.clone(),
            Arc::new(TypeRegistry::new()),
            RuntimeConfig::default(),
        ));
        fixture.dispatcher.register_subscription_manager(Arc::clone(&manager));
        manager
    }

    fn inbound<T: Serialize>(message_type: MessageType, payload: &T, expiry_date_ms: u64) -> Message {
        Message::new("m-1", message_type, "consumer-1", "provider-1", payload)
            .unwrap()
            .with_expiry_date(expiry_date_ms)
    }

    #[test]
    fn originated_messages_carry_uplifted_expiry() {
        let fixture = fixture();
        let request = Request::new("getCurrentStation", vec![], vec![], "rr-1");
        fixture
            .dispatcher
            .send_request(&settings(1_000), &request)
            .unwrap();

        let sent = fixture.transport.take();
        assert_eq!(sent.len(), 1);
        let message = &sent[0];
        assert_eq!(message.message_type, MessageType::Request);
        assert_eq!(message.from, "proxy-1");
        assert_eq!(message.to, "provider-1");
        assert_eq!(message.expiry_date_ms, EPOCH_MS + 1_000 + UPLIFT_MS);
        assert_eq!(message.payload::<Request>().unwrap(), request);
    }

    #[test]
    fn uplift_saturates() {
        let fixture = fixture();
        fixture
            .dispatcher
            .send_subscription_stop(&settings(u64::MAX), &SubscriptionStop {
                subscription_id: "s-1".to_string(),
            })
            .unwrap();
        assert_eq!(fixture.transport.messages()[0].expiry_date_ms, MAX_EXPIRY_DATE_MS);
        assert_eq!(fixture.dispatcher.uplift(MAX_EXPIRY_DATE_MS - 1), MAX_EXPIRY_DATE_MS);
    }

    #[test]
    fn multicast_receivers_are_forwarded_to_the_transport() {
        let fixture = fixture();
        let request = BroadcastSubscription::Multicast(MulticastSubscriptionRequest {
            subscription_id: "s-1".to_string(),
            subscribed_to_name: "weakSignal".to_string(),
            qos: SubscriptionQos::default(),
            multicast_id: "provider-1/weakSignal".to_string(),
        });
        fixture
            .dispatcher
            .send_broadcast_subscription_request(&settings(1_000), &request)
            .unwrap();
        assert!(fixture.transport.multicast_receivers().is_empty());
        assert_eq!(
            fixture.transport.messages()[0].message_type,
            MessageType::MulticastSubscriptionRequest
        );

        fixture
            .dispatcher
            .add_multicast_receiver("provider-1/weakSignal", "proxy-1", "provider-1")
            .unwrap();
        assert_eq!(
            fixture.transport.multicast_receivers(),
            vec![("provider-1/weakSignal".to_string(), "proxy-1".to_string())]
        );

        let stop = SubscriptionStop {
            subscription_id: "s-1".to_string(),
        };
        fixture
            .dispatcher
            .send_multicast_subscription_stop(&settings(1_000), "provider-1/weakSignal", &stop)
            .unwrap();
        assert_eq!(
            fixture.transport.messages()[1].message_type,
            MessageType::SubscriptionStop
        );
        fixture
            .dispatcher
            .remove_multicast_receiver("provider-1/weakSignal", "proxy-1", "provider-1")
            .unwrap();
        assert!(fixture.transport.multicast_receivers().is_empty());
    }

    #[tokio::test]
    async fn inbound_request_is_answered_with_verbatim_expiry() {
        let fixture = fixture();
        let manager = with_request_reply(&fixture);
        let provider = Provider::new("vehicle/Radio", conduit_core::Version::new(1, 0)).with_operation(
            "echo",
            |params: Vec<Value>, _types: Vec<String>| async move { Ok::<_, ProviderError>(params) },
        );
        manager.add_request_caller("provider-1", Arc::new(provider)).unwrap();

        let request = Request::new("echo", vec![json!("FM4")], vec!["String".to_string()], "rr-7");
        fixture
            .dispatcher
            .receive(inbound(MessageType::Request, &request, EPOCH_MS + 2_000))
            .await
            .unwrap();

        let sent = fixture.transport.take();
        assert_eq!(sent.len(), 1);
        let answer = &sent[0];
        assert_eq!(answer.message_type, MessageType::Reply);
        assert_eq!(answer.from, "provider-1");
        assert_eq!(answer.to, "consumer-1");
        assert_eq!(answer.expiry_date_ms, EPOCH_MS + 2_000);
        let reply: Reply = answer.payload().unwrap();
        assert_eq!(reply.request_reply_id, "rr-7");
        assert_eq!(reply.response, Some(vec![json!("FM4")]));
    }

    #[tokio::test]
    async fn request_for_unknown_provider_gets_error_reply() {
        let fixture = fixture();
        with_request_reply(&fixture);
        let request = Request::new("echo", vec![], vec![], "rr-8");
        fixture
            .dispatcher
            .receive(inbound(MessageType::Request, &request, EPOCH_MS + 2_000))
            .await
            .unwrap();

        let reply: Reply = fixture.transport.take()[0].payload().unwrap();
        assert!(matches!(reply.error, Some(RemoteException::MethodInvocation { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn reply_completes_outbound_request() {
        let fixture = fixture();
        let manager = with_request_reply(&fixture);
        let request = Request::new("getCurrentStation", vec![], vec![], "rr-1");
        let outcome = manager.send_request(&settings(1_000), request, vec!["String".to_string()]);

        let reply = Reply::success("rr-1", vec![json!("Oe1")]);
        fixture
            .dispatcher
            .receive(inbound(MessageType::Reply, &reply, EPOCH_MS + 1_000))
            .await
            .unwrap();
        assert_eq!(outcome.await.unwrap(), vec![json!("Oe1")]);
    }

    #[tokio::test]
    async fn expired_messages_are_dropped() {
        let fixture = fixture();
        let manager = with_request_reply(&fixture);
        let provider = Provider::new("vehicle/Radio", conduit_core::Version::new(1, 0));
        manager.add_request_caller("provider-1", Arc::new(provider)).unwrap();
        fixture.clock.advance(5_000);

        let request = Request::new("echo", vec![], vec![], "rr-1");
        let result = fixture
            .dispatcher
            .receive(inbound(MessageType::Request, &request, EPOCH_MS + 1_000))
            .await;
        assert!(matches!(result, Err(DispatchError::Expired { .. })));
        assert!(fixture.transport.messages().is_empty());
    }

    #[tokio::test]
    async fn provider_side_subscription_traffic_is_unroutable() {
        let fixture = fixture();
        with_subscriptions(&fixture);
        let request = SubscriptionRequest {
            subscription_id: "s-1".to_string(),
            subscribed_to_name: "currentStation".to_string(),
            qos: SubscriptionQos::default(),
        };
        let result = fixture
            .dispatcher
            .receive(inbound(MessageType::SubscriptionRequest, &request, EPOCH_MS + 1_000))
            .await;
        assert!(matches!(
            result,
            Err(DispatchError::Unroutable {
                message_type: MessageType::SubscriptionRequest
            })
        ));
    }

    #[tokio::test]
    async fn publication_for_unknown_subscription_is_rejected() {
        let fixture = fixture();
        with_subscriptions(&fixture);
        let publication = SubscriptionPublication::new("nobody", vec![json!(1)]);
        let result = fixture
            .dispatcher
            .receive(inbound(MessageType::Publication, &publication, EPOCH_MS + 1_000))
            .await;
        assert!(matches!(result, Err(DispatchError::Rejected { .. })));

        let multicast = MulticastPublication::new("provider-1/weakSignal", vec![json!(1)]);
        let result = fixture
            .dispatcher
            .receive(inbound(MessageType::Multicast, &multicast, EPOCH_MS + 1_000))
            .await;
        assert!(matches!(result, Err(DispatchError::Rejected { .. })));
    }

    #[tokio::test]
    async fn garbage_payload_is_an_envelope_error() {
        let fixture = fixture();
        with_subscriptions(&fixture);
        let result = fixture
            .dispatcher
            .receive(inbound(MessageType::SubscriptionReply, &json!(42), EPOCH_MS + 1_000))
            .await;
        assert!(matches!(result, Err(DispatchError::Envelope(_))));
    }

    #[test]
    fn publications_are_uplifted() {
        let fixture = fixture();
        fixture
            .dispatcher
            .send_publication(
                "provider-1",
                "consumer-1",
                EPOCH_MS + 100,
                &SubscriptionPublication::new("s-1", vec![json!(1)]),
            )
            .unwrap();
        fixture
            .dispatcher
            .send_multicast_publication(
                "provider-1",
                EPOCH_MS + 100,
                &MulticastPublication::new("provider-1/weakSignal", vec![json!(1)]),
            )
            .unwrap();

        let sent = fixture.transport.take();
        assert_eq!(sent[0].expiry_date_ms, EPOCH_MS + 100 + UPLIFT_MS);
        assert_eq!(sent[1].to, "provider-1/weakSignal");
        assert_eq!(sent[1].message_type, MessageType::Multicast);
        assert_eq!(sent[1].expiry_date_ms, EPOCH_MS + 100 + UPLIFT_MS);
    }

    #[test]
    fn subscription_reply_reuses_request_expiry() {
        let fixture = fixture();
        let request = inbound(
            MessageType::SubscriptionRequest,
            &SubscriptionStop {
                subscription_id: "s-1".to_string(),
            },
            EPOCH_MS + 42,
        );
        fixture
            .dispatcher
            .send_subscription_reply(&request, &SubscriptionReply::accepted("s-1"))
            .unwrap();
        let sent = fixture.transport.take();
        assert_eq!(sent[0].expiry_date_ms, EPOCH_MS + 42);
        assert_eq!(sent[0].to, "consumer-1");
    }

    #[tokio::test]
    async fn shutdown_releases_managers() {
        let fixture = fixture();
        with_request_reply(&fixture);
        fixture.dispatcher.shutdown();

        let reply = Reply::success("rr-1", vec![]);
        let result = fixture
            .dispatcher
            .receive(inbound(MessageType::Reply, &reply, EPOCH_MS + 1_000))
            .await;
        assert!(matches!(result, Err(DispatchError::NoManager(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn registration_round_trip_through_envelopes() {
        let fixture = fixture();
        let manager = with_subscriptions(&fixture);
        let pending = manager.register_subscription(crate::dispatching::AttributeSubscriptionParams::new(
            "proxy-1",
            provider_entry(),
            "currentStation",
            "String",
            SubscriptionQos::default(),
        ));

        let sent = fixture.transport.take();
        assert_eq!(sent[0].message_type, MessageType::SubscriptionRequest);
        let request: SubscriptionRequest = sent[0].payload().unwrap();
        assert_eq!(request.subscription_id, pending.subscription_id());

        let reply = SubscriptionReply::accepted(&request.subscription_id);
        fixture
            .dispatcher
            .receive(inbound(MessageType::SubscriptionReply, &reply, EPOCH_MS + 1_000))
            .await
            .unwrap();
        assert_eq!(pending.await.unwrap(), request.subscription_id);
        manager
            .unregister_subscription(crate::dispatching::UnsubscribeParams::new(&request.subscription_id))
            .unwrap();
        assert_eq!(fixture.transport.take()[0].message_type, MessageType::SubscriptionStop);
    }

    proptest! {
        #[test]
        fn uplift_is_bounded_and_never_shortens(expiry in any::<u64>(), uplift in any::<u64>()) {
            let dispatcher = Dispatcher::new(RecordingTransport::new(), Arc::new(ManualClock::new(0)), uplift);
            let uplifted = dispatcher.uplift(expiry);
            prop_assert!(uplifted <= MAX_EXPIRY_DATE_MS);
            prop_assert!(uplifted >= expiry.min(MAX_EXPIRY_DATE_MS));
        }
    }
}
