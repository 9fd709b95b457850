//! Request-reply correlation.
//!
//! The [`RequestReplyManager`] plays both roles of a call:
//!
//! - callee: inbound requests are resolved against locally registered
//!   [`Provider`]s and always answered with exactly one [`Reply`]
//! - caller: outbound requests register a [`ReplyCaller`] under their
//!   `requestReplyId`; the matching inbound reply, the ttl timer, or
//!   shutdown completes it, whichever comes first

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conduit_core::messages::{OneWayRequest, Reply, Request};
use conduit_core::{RemoteException, TypeRegistry, TypingError};
use dashmap::DashMap;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::correlation::CorrelationTable;
use crate::error::{ProviderError, ReplyError};
use crate::provider::{
    decapitalize, AttributeGetter, AttributeSetter, Provider, ProviderAttribute, ProviderOperation,
};
use crate::traits::{MessageSender, SendSettings};

pub type ReplyOutcome = Result<Vec<Value>, ReplyError>;

enum Completion {
    Handlers {
        resolve: Box<dyn FnOnce(Vec<Value>) + Send>,
        reject: Box<dyn FnOnce(ReplyError) + Send>,
    },
    Channel(oneshot::Sender<ReplyOutcome>),
}

/// Completion handlers of one outstanding request.
pub struct ReplyCaller {
    completion: Completion,
    output_types: Vec<String>,
}

impl std::fmt::Debug for ReplyCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyCaller")
            .field("output_types", &self.output_types)
            .finish_non_exhaustive()
    }
}

impl ReplyCaller {
    #[must_use]
    pub fn new<R, J>(resolve: R, reject: J) -> Self
    where
        R: FnOnce(Vec<Value>) + Send + 'static,
        J: FnOnce(ReplyError) + Send + 'static,
    {
        Self {
            completion: Completion::Handlers {
                resolve: Box::new(resolve),
                reject: Box::new(reject),
            },
            output_types: Vec::new(),
        }
    }

    fn channel() -> (Self, oneshot::Receiver<ReplyOutcome>) {
        let (tx, rx) = oneshot::channel();
        let caller = Self {
            completion: Completion::Channel(tx),
            output_types: Vec::new(),
        };
        (caller, rx)
    }

    /// Declared types of the response values, used for type augmentation.
    #[must_use]
    pub fn with_output_types(mut self, output_types: Vec<String>) -> Self {
        self.output_types = output_types;
        self
    }

    fn complete(self, outcome: ReplyOutcome) {
        match self.completion {
            Completion::Handlers { resolve, reject } => match outcome {
                Ok(response) => resolve(response),
                Err(error) => reject(error),
            },
            Completion::Channel(tx) => {
                // The caller may have stopped waiting.
                let _ = tx.send(outcome);
            }
        }
    }
}

enum Member {
    Operation(Arc<dyn ProviderOperation>),
    Getter(Arc<dyn AttributeGetter>),
    Setter(Arc<dyn AttributeSetter>),
}

impl Member {
    /// Resolution order: exact operation name, then `get<Attribute>` on a
    /// readable attribute, then `set<Attribute>` on a writable one.
    fn resolve(provider: &Provider, method_name: &str) -> Result<Self, RemoteException> {
        if let Some(operation) = provider.operation(method_name) {
            return Ok(Self::Operation(operation));
        }
        if let Some(suffix) = method_name.strip_prefix("get") {
            if let Some(getter) = provider
                .accessor_attribute(suffix)
                .and_then(ProviderAttribute::getter)
            {
                return Ok(Self::Getter(getter));
            }
        } else if let Some(suffix) = method_name.strip_prefix("set") {
            if let Some(setter) = provider
                .accessor_attribute(suffix)
                .and_then(ProviderAttribute::setter)
            {
                return Ok(Self::Setter(setter));
            }
        }

        let accessor = method_name
            .strip_prefix("get")
            .or_else(|| method_name.strip_prefix("set"))
            .filter(|suffix| !suffix.is_empty());
        let detail_message = match accessor {
            Some(suffix) => format!(
                "Could not find an operation \"{method_name}\" or an attribute \"{}\" in the provider",
                decapitalize(suffix)
            ),
            None => format!("Could not find an operation \"{method_name}\" in the provider"),
        };
        Err(RemoteException::MethodInvocation {
            detail_message,
            provider_version: Some(provider.version()),
        })
    }

    async fn call(
        self,
        mut params: Vec<Value>,
        param_datatypes: Vec<String>,
    ) -> Result<Vec<Value>, ProviderError> {
        match self {
            Self::Operation(operation) => operation.invoke(params, param_datatypes).await,
            Self::Getter(getter) => getter.get().await.map(|value| vec![value]),
            Self::Setter(setter) => {
                if params.is_empty() {
                    return Err(ProviderError::InvalidArguments(
                        "attribute setter expects one parameter".to_string(),
                    ));
                }
                setter.set(params.swap_remove(0)).await.map(|()| Vec::new())
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Correlates requests with replies and serves requests for local providers.
pub struct RequestReplyManager {
    running: AtomicBool,
    providers: DashMap<String, Arc<Provider>>,
    reply_callers: CorrelationTable<String, ReplyCaller>,
    sender: Arc<dyn MessageSender>,
    types: Arc<TypeRegistry>,
}

impl std::fmt::Debug for RequestReplyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestReplyManager")
            .field("running", &self.is_running())
            .field("providers", &self.providers.len())
            .field("reply_callers", &self.reply_callers)
            .finish_non_exhaustive()
    }
}

impl RequestReplyManager {
    #[must_use]
    pub fn new(sender: Arc<dyn MessageSender>, types: Arc<TypeRegistry>) -> Self {
        Self {
            running: AtomicBool::new(true),
            providers: DashMap::new(),
            reply_callers: CorrelationTable::new(),
            sender,
            types,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    // -- callee side --------------------------------------------------------

    /// Registers a local provider, replacing any previous registration.
    ///
    /// # Errors
    ///
    /// Returns [`ReplyError::ShutDown`] after [`shutdown`](Self::shutdown).
    pub fn add_request_caller(
        &self,
        participant_id: impl Into<String>,
        provider: Arc<Provider>,
    ) -> Result<(), ReplyError> {
        if !self.is_running() {
            return Err(ReplyError::ShutDown);
        }
        self.providers.insert(participant_id.into(), provider);
        Ok(())
    }

    pub fn remove_request_caller(&self, participant_id: &str) {
        self.providers.remove(participant_id);
    }

    #[must_use]
    pub fn has_request_caller(&self, participant_id: &str) -> bool {
        self.providers.contains_key(participant_id)
    }

    /// Serves an inbound request. Never fails: every failure, including a
    /// panicking provider, is returned as the reply's error.
    pub async fn handle_request(&self, provider_participant_id: &str, request: Request) -> Reply {
        let Request {
            method_name,
            param_datatypes,
            params,
            request_reply_id,
        } = request;

        match self
            .invoke(provider_participant_id, &method_name, params, param_datatypes)
            .await
        {
            Ok(response) => Reply::success(request_reply_id, response),
            Err(error) => {
                debug!(
                    request_reply_id = %request_reply_id,
                    method_name = %method_name,
                    error = %error,
                    "request failed"
                );
                Reply::failure(request_reply_id, error)
            }
        }
    }

    /// Serves an inbound one-way request. Only operations can be invoked.
    ///
    /// # Errors
    ///
    /// Returns the failure as a [`RemoteException`]; the caller only logs it,
    /// since one-way requests are never answered.
    pub async fn handle_one_way_request(
        &self,
        provider_participant_id: &str,
        request: OneWayRequest,
    ) -> Result<(), RemoteException> {
        let provider = self.provider(provider_participant_id)?;
        let operation = provider.operation(&request.method_name).ok_or_else(|| {
            RemoteException::MethodInvocation {
                detail_message: format!(
                    "Could not find an operation \"{}\" in the provider",
                    request.method_name
                ),
                provider_version: Some(provider.version()),
            }
        })?;
        let params = self.augment_params(request.params, &request.param_datatypes)?;
        Self::guarded(
            &provider,
            &request.method_name,
            Member::Operation(operation).call(params, request.param_datatypes),
        )
        .await
        .map(|_| ())
    }

    fn provider(&self, participant_id: &str) -> Result<Arc<Provider>, RemoteException> {
        if !self.is_running() {
            return Err(RemoteException::method_invocation(
                "request-reply manager is already shut down",
            ));
        }
        self.providers
            .get(participant_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                RemoteException::method_invocation(format!(
                    "no provider registered for participant {participant_id}"
                ))
            })
    }

    async fn invoke(
        &self,
        provider_participant_id: &str,
        method_name: &str,
        params: Vec<Value>,
        param_datatypes: Vec<String>,
    ) -> Result<Vec<Value>, RemoteException> {
        let provider = self.provider(provider_participant_id)?;
        let member = Member::resolve(&provider, method_name)?;
        let params = self.augment_params(params, &param_datatypes)?;
        Self::guarded(&provider, method_name, member.call(params, param_datatypes)).await
    }

    async fn guarded<F>(provider: &Provider, method_name: &str, call: F) -> Result<Vec<Value>, RemoteException>
    where
        F: Future<Output = Result<Vec<Value>, ProviderError>>,
    {
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => result.map_err(RemoteException::from),
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!(method_name = %method_name, reason = %reason, "provider member panicked");
                Err(RemoteException::MethodInvocation {
                    detail_message: format!("{method_name} panicked: {reason}"),
                    provider_version: Some(provider.version()),
                })
            }
        }
    }

    fn augment_params(
        &self,
        params: Vec<Value>,
        param_datatypes: &[String],
    ) -> Result<Vec<Value>, RemoteException> {
        self.augment(params, param_datatypes)
            .map_err(|e| RemoteException::method_invocation(format!("invalid parameters: {e}")))
    }

    fn augment(&self, values: Vec<Value>, declared_types: &[String]) -> Result<Vec<Value>, TypingError> {
        values
            .into_iter()
            .enumerate()
            .map(|(i, value)| {
                self.types
                    .augment_types(value, declared_types.get(i).map(String::as_str))
            })
            .collect()
    }

    // -- caller side --------------------------------------------------------

    /// Stores `caller` until the reply for `request_reply_id` arrives or
    /// `ttl` elapses. A caller already stored under the same id is abandoned
    /// without being completed.
    ///
    /// # Errors
    ///
    /// Returns [`ReplyError::ShutDown`] after [`shutdown`](Self::shutdown).
    pub fn add_reply_caller(
        &self,
        request_reply_id: impl Into<String>,
        caller: ReplyCaller,
        ttl: Duration,
    ) -> Result<(), ReplyError> {
        if !self.is_running() {
            return Err(ReplyError::ShutDown);
        }
        let request_reply_id = request_reply_id.into();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let replaced = self.reply_callers.insert(
            request_reply_id.clone(),
            caller,
            ttl,
            move |request_reply_id, caller: ReplyCaller| {
                debug!(request_reply_id = %request_reply_id, ttl_ms, "reply timed out");
                caller.complete(Err(ReplyError::Timeout {
                    request_reply_id,
                    ttl_ms,
                }));
            },
        );
        if replaced.is_some() {
            debug!(request_reply_id = %request_reply_id, "replaced pending reply caller");
        }
        Ok(())
    }

    /// Completes the caller waiting for `reply`. Replies nobody waits for
    /// (unknown, late or duplicate) are dropped.
    pub fn handle_reply(&self, reply: Reply) {
        let Some(caller) = self.reply_callers.take(&reply.request_reply_id) else {
            debug!(request_reply_id = %reply.request_reply_id, "dropping reply without pending caller");
            return;
        };
        let outcome = match reply.into_result() {
            Ok(response) => self
                .augment(response, &caller.output_types)
                .map_err(ReplyError::from),
            Err(error) => Err(ReplyError::Remote(error)),
        };
        caller.complete(outcome);
    }

    /// Sends `request` and resolves with the augmented response values.
    ///
    /// The request is sent before this returns; the returned future only
    /// waits for the outcome. The reply timeout is the messaging ttl.
    pub fn send_request(
        &self,
        settings: &SendSettings,
        request: Request,
        output_types: Vec<String>,
    ) -> impl Future<Output = ReplyOutcome> + Send + 'static {
        let request_reply_id = request.request_reply_id.clone();
        let started = self.start_request(settings, &request, output_types);
        async move {
            match started {
                Ok(rx) => rx
                    .await
                    .unwrap_or_else(|_| Err(ReplyError::Abandoned { request_reply_id })),
                Err(error) => Err(error),
            }
        }
    }

    fn start_request(
        &self,
        settings: &SendSettings,
        request: &Request,
        output_types: Vec<String>,
    ) -> Result<oneshot::Receiver<ReplyOutcome>, ReplyError> {
        let (caller, rx) = ReplyCaller::channel();
        self.add_reply_caller(
            request.request_reply_id.clone(),
            caller.with_output_types(output_types),
            Duration::from_millis(settings.messaging_qos.ttl_ms),
        )?;
        if let Err(error) = self.sender.send_request(settings, request) {
            self.reply_callers.take(&request.request_reply_id);
            return Err(error.into());
        }
        Ok(rx)
    }

    /// # Errors
    ///
    /// Returns [`ReplyError::ShutDown`] after shutdown, or the dispatch error.
    pub fn send_one_way_request(
        &self,
        settings: &SendSettings,
        request: &OneWayRequest,
    ) -> Result<(), ReplyError> {
        if !self.is_running() {
            return Err(ReplyError::ShutDown);
        }
        Ok(self.sender.send_one_way_request(settings, request)?)
    }

    #[must_use]
    pub fn pending_replies(&self) -> usize {
        self.reply_callers.len()
    }

    /// Rejects every pending caller and refuses further work. Idempotent.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.providers.clear();
        for (request_reply_id, caller) in self.reply_callers.drain() {
            debug!(request_reply_id = %request_reply_id, "rejecting pending reply on shutdown");
            caller.complete(Err(ReplyError::ShutDown));
        }
    }
}
