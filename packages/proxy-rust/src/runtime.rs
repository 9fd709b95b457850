//! Runtime facade wiring the dispatcher and both managers.
//!
//! [`ProxyRuntime::builder`] creates every collaborator explicitly: no
//! registry, clock or configuration is process-global. The runtime moves
//! through `Running -> ShuttingDown -> Stopped`; [`ProxyRuntime::shutdown`]
//! performs the transition once.

use std::sync::Arc;

use arc_swap::ArcSwap;
use conduit_core::messages::Message;
use conduit_core::{ClockSource, TypeRegistry};
use tracing::{debug, info};

use crate::config::RuntimeConfig;
use crate::dispatching::{Dispatcher, RequestReplyManager, SubscriptionManager};
use crate::error::{DispatchError, ReplyError};
use crate::provider::Provider;
use crate::timer::TokioClock;
use crate::traits::Transport;

/// Lifecycle state of a [`ProxyRuntime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Running,
    /// Subscriptions are being terminated and managers shut down.
    ShuttingDown,
    Stopped,
}

pub struct ProxyRuntimeBuilder {
    transport: Arc<dyn Transport>,
    config: RuntimeConfig,
    clock: Option<Arc<dyn ClockSource>>,
    types: Option<Arc<TypeRegistry>>,
}

impl ProxyRuntimeBuilder {
    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default [`TokioClock`].
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Shares an existing type registry instead of creating an empty one.
    #[must_use]
    pub fn types(mut self, types: Arc<TypeRegistry>) -> Self {
        self.types = Some(types);
        self
    }

    #[must_use]
    pub fn build(self) -> ProxyRuntime {
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(TokioClock::new()) as Arc<dyn ClockSource>);
        let types = self.types.unwrap_or_default();

        let dispatcher = Arc::new(Dispatcher::new(
            self.transport,
            Arc::clone(&clock),
            self.config.ttl_uplift_ms,
        ));
        let request_reply_manager = Arc::new(RequestReplyManager::new(
            dispatcher.clone(),
            Arc::clone(&types),
        ));
        let subscription_manager = Arc::new(SubscriptionManager::new(
            dispatcher.clone(),
            Arc::clone(&clock),
            Arc::clone(&types),
            self.config.clone(),
        ));
        dispatcher.register_request_reply_manager(Arc::clone(&request_reply_manager));
        dispatcher.register_subscription_manager(Arc::clone(&subscription_manager));

        debug!(config = ?self.config, "proxy runtime started");
        ProxyRuntime {
            config: self.config,
            clock,
            types,
            dispatcher,
            request_reply_manager,
            subscription_manager,
            state: ArcSwap::from_pointee(RuntimeState::Running),
        }
    }
}

/// One proxy runtime: a dispatcher bound to a transport plus the managers
/// it routes to.
///
/// The dispatcher and the managers reference each other; shutting the
/// runtime down (explicitly or on drop) releases those references.
pub struct ProxyRuntime {
    config: RuntimeConfig,
    clock: Arc<dyn ClockSource>,
    types: Arc<TypeRegistry>,
    dispatcher: Arc<Dispatcher>,
    request_reply_manager: Arc<RequestReplyManager>,
    subscription_manager: Arc<SubscriptionManager>,
    state: ArcSwap<RuntimeState>,
}

impl std::fmt::Debug for ProxyRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyRuntime")
            .field("state", &self.state())
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl ProxyRuntime {
    #[must_use]
    pub fn builder(transport: Arc<dyn Transport>) -> ProxyRuntimeBuilder {
        ProxyRuntimeBuilder {
            transport,
            config: RuntimeConfig::default(),
            clock: None,
            types: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> RuntimeState {
        **self.state.load()
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[must_use]
    pub fn clock(&self) -> Arc<dyn ClockSource> {
        Arc::clone(&self.clock)
    }

    #[must_use]
    pub fn types(&self) -> Arc<TypeRegistry> {
        Arc::clone(&self.types)
    }

    #[must_use]
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    #[must_use]
    pub fn request_reply_manager(&self) -> Arc<RequestReplyManager> {
        Arc::clone(&self.request_reply_manager)
    }

    #[must_use]
    pub fn subscription_manager(&self) -> Arc<SubscriptionManager> {
        Arc::clone(&self.subscription_manager)
    }

    /// Makes `provider` reachable under `participant_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ReplyError::ShutDown`] once the runtime is shut down.
    pub fn register_provider(
        &self,
        participant_id: impl Into<String>,
        provider: Provider,
    ) -> Result<(), ReplyError> {
        self.request_reply_manager
            .add_request_caller(participant_id, Arc::new(provider))
    }

    /// Decodes an envelope received from the transport and routes it.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Envelope`] for undecodable bytes, otherwise
    /// whatever [`Dispatcher::receive`] reports.
    pub async fn receive(&self, bytes: &[u8]) -> Result<(), DispatchError> {
        let message = Message::decode(bytes)?;
        self.dispatcher.receive(message).await
    }

    /// Stops every subscription, then shuts down the subscription manager,
    /// the request-reply manager and the dispatcher, in that order.
    /// Calling it again has no effect.
    pub fn shutdown(&self) {
        let current = self.state.load_full();
        if *current != RuntimeState::Running {
            return;
        }
        let previous = self
            .state
            .compare_and_swap(&current, Arc::new(RuntimeState::ShuttingDown));
        if !Arc::ptr_eq(&previous, &current) {
            return;
        }

        let stopped = self.subscription_manager.terminate_subscriptions();
        self.subscription_manager.shutdown();
        self.request_reply_manager.shutdown();
        self.dispatcher.shutdown();
        self.state.store(Arc::new(RuntimeState::Stopped));
        info!(subscriptions_stopped = stopped, "proxy runtime stopped");
    }
}

impl Drop for ProxyRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use conduit_core::messages::{MessageType, Reply, Request, SubscriptionReply, SubscriptionRequest};
    use conduit_core::{MessagingQos, SubscriptionQos};
    use serde_json::{json, Value};

    use super::*;
    use crate::dispatching::{AttributeSubscriptionParams, BroadcastSubscriptionParams};
    use crate::error::ProviderError;
    use crate::provider::ProviderAttribute;
    use crate::testing::{provider_entry, RecordingTransport, EPOCH_MS};
    use crate::traits::SendSettings;

    fn runtime(transport: &Arc<RecordingTransport>) -> ProxyRuntime {
        ProxyRuntime::builder(transport.clone())
            .clock(Arc::new(TokioClock::starting_at(EPOCH_MS)))
            .config(RuntimeConfig {
                ttl_uplift_ms: 1_000,
                ..RuntimeConfig::default()
            })
            .build()
    }

    fn encoded<T: serde::Serialize>(message_type: MessageType, payload: &T) -> Vec<u8> {
        Message::new("m-1", message_type, "consumer-1", "provider-1", payload)
            .unwrap()
            .with_expiry_date(EPOCH_MS + 60_000)
            .encode()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn serves_requests_from_encoded_bytes() {
        let transport = RecordingTransport::new();
        let runtime = runtime(&transport);
        let provider = Provider::new("vehicle/Radio", conduit_core::Version::new(1, 0)).with_attribute(
            ProviderAttribute::read_only("currentStation", "String", || async {
                Ok::<_, ProviderError>(json!("FM4"))
            }),
        );
        runtime.register_provider("provider-1", provider).unwrap();

        let request = Request::new("getCurrentStation", vec![], vec![], "rr-1");
        runtime
            .receive(&encoded(MessageType::Request, &request))
            .await
            .unwrap();

        let sent = transport.take();
        assert_eq!(sent.len(), 1);
        let reply: Reply = sent[0].payload().unwrap();
        assert_eq!(reply.response, Some(vec![json!("FM4")]));
        // Answers keep the request's expiry; the uplift is not applied again.
        assert_eq!(sent[0].expiry_date_ms, EPOCH_MS + 60_000);
    }

    #[tokio::test(start_paused = true)]
    async fn outbound_requests_are_uplifted_but_time_out_on_caller_ttl() {
        let transport = RecordingTransport::new();
        let runtime = runtime(&transport);
        let settings = SendSettings::new("proxy-1", provider_entry(), MessagingQos::with_ttl(200));
        let outcome = runtime.request_reply_manager().send_request(
            &settings,
            Request::new("getCurrentStation", vec![], vec![], "rr-1"),
            vec![],
        );

        assert_eq!(transport.messages()[0].expiry_date_ms, EPOCH_MS + 200 + 1_000);
        tokio::time::sleep(std::time::Duration::from_millis(201)).await;
        assert!(matches!(outcome.await, Err(ReplyError::Timeout { ttl_ms: 200, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn garbage_bytes_are_rejected() {
        let transport = RecordingTransport::new();
        let runtime = runtime(&transport);
        assert!(matches!(
            runtime.receive(&[0xc1, 0x00]).await,
            Err(DispatchError::Envelope(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_subscriptions_once() {
        let transport = RecordingTransport::new();
        let runtime = runtime(&transport);
        let received = Arc::new(parking_lot::Mutex::new(Vec::<Value>::new()));
        let sink = Arc::clone(&received);
        let pending = runtime.subscription_manager().register_subscription(
            AttributeSubscriptionParams::new(
                "proxy-1",
                provider_entry(),
                "currentStation",
                "String",
                SubscriptionQos::default(),
            )
            .with_listener(
                crate::dispatching::SubscriptionListener::new()
                    .on_receive(move |value| sink.lock().push(value)),
            ),
        );
        let request: SubscriptionRequest = transport.take()[0].payload().unwrap();
        runtime
            .receive(&encoded(
                MessageType::SubscriptionReply,
                &SubscriptionReply::accepted(&request.subscription_id),
            ))
            .await
            .unwrap();
        pending.await.unwrap();

        runtime.shutdown();
        assert_eq!(runtime.state(), RuntimeState::Stopped);
        let sent = transport.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message_type, MessageType::SubscriptionStop);

        runtime.shutdown();
        assert!(transport.messages().is_empty());
        assert!(matches!(
            runtime
                .receive(&encoded(MessageType::Reply, &Reply::success("rr-1", vec![])))
                .await,
            Err(DispatchError::NoManager(_))
        ));
        assert!(matches!(
            runtime.register_provider("provider-2", Provider::new("vehicle/Radio", conduit_core::Version::new(1, 0))),
            Err(ReplyError::ShutDown)
        ));
        assert!(received.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn multicast_receivers_follow_subscriptions() {
        let transport = RecordingTransport::new();
        let runtime = runtime(&transport);
        let multicast = |id: &str| {
            BroadcastSubscriptionParams::multicast("proxy-1", provider_entry(), "weakSignal", SubscriptionQos::default())
                .with_subscription_id(id)
        };
        let receiver = vec![("provider-1/weakSignal".to_string(), "proxy-1".to_string())];

        let rejected = runtime.subscription_manager().register_broadcast_subscription(multicast("m-1"));
        assert_eq!(transport.multicast_receivers(), receiver);
        runtime
            .receive(&encoded(
                MessageType::SubscriptionReply,
                &SubscriptionReply::rejected("m-1", conduit_core::RemoteException::provider_runtime("busy")),
            ))
            .await
            .unwrap();
        assert!(rejected.await.is_err());
        assert!(transport.multicast_receivers().is_empty());

        let accepted = runtime.subscription_manager().register_broadcast_subscription(multicast("m-2"));
        drop(runtime.subscription_manager().register_broadcast_subscription(multicast("m-3")));
        runtime
            .receive(&encoded(MessageType::SubscriptionReply, &SubscriptionReply::accepted("m-2")))
            .await
            .unwrap();
        accepted.await.unwrap();
        assert_eq!(transport.multicast_receivers(), receiver);

        runtime.shutdown();
        assert!(transport.multicast_receivers().is_empty());
        let stops = transport
            .messages()
            .iter()
            .filter(|message| message.message_type == MessageType::SubscriptionStop)
            .count();
        assert_eq!(stops, 1);
    }
}
