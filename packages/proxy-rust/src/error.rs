//! Error types surfaced by the proxy runtime.
//!
//! Errors raised inside a provider never appear here: they travel back to the
//! caller as a [`RemoteException`] inside the reply and surface as
//! [`ReplyError::Remote`].

use conduit_core::messages::{EnvelopeError, FilterParameterError, MessageType};
use conduit_core::{PartitionError, RemoteException, TypingError};

/// Failure reported by a [`Transport`](crate::traits::Transport).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error("no route to participant {participant_id}")]
    NoRoute { participant_id: String },
    #[error("transport failure: {0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error("no {0} is registered with the dispatcher")]
    NoManager(&'static str),
    #[error("message {message_id} expired at {expiry_date_ms}")]
    Expired {
        message_id: String,
        expiry_date_ms: u64,
    },
    #[error("{message_type:?} messages are not handled by this runtime")]
    Unroutable { message_type: MessageType },
    #[error("{message_type:?} message {message_id} was rejected: {reason}")]
    Rejected {
        message_type: MessageType,
        message_id: String,
        reason: String,
    },
}

/// Outcome of an outbound request that did not produce a response.
#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    #[error("no reply to request {request_reply_id} within {ttl_ms} ms")]
    Timeout { request_reply_id: String, ttl_ms: u64 },
    #[error(transparent)]
    Remote(#[from] RemoteException),
    #[error("request-reply manager is already shut down")]
    ShutDown,
    #[error("reply caller for {request_reply_id} was replaced")]
    Abandoned { request_reply_id: String },
    #[error("reply payload has unexpected type: {0}")]
    Typing(#[from] TypingError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    /// The provider rejected the registration. Always carries a
    /// [`RemoteException::Subscription`].
    #[error(transparent)]
    Rejected(RemoteException),
    #[error("subscription request {subscription_id} was not acknowledged within {ttl_ms} ms")]
    Timeout { subscription_id: String, ttl_ms: u64 },
    #[error(transparent)]
    InvalidPartitions(#[from] PartitionError),
    #[error(transparent)]
    InvalidFilterParameters(#[from] FilterParameterError),
    #[error("unknown subscription {subscription_id}")]
    UnknownSubscription { subscription_id: String },
    #[error("no subscription registered for multicast {multicast_id}")]
    UnknownMulticast { multicast_id: String },
    #[error("subscription manager is already shut down")]
    ShutDown,
    #[error("registration of subscription {subscription_id} was abandoned")]
    Abandoned { subscription_id: String },
    #[error("publication payload has unexpected type: {0}")]
    Typing(#[from] TypingError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl SubscriptionError {
    /// Id of the subscription the error refers to, when known.
    #[must_use]
    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            Self::Rejected(exception) => exception.subscription_id(),
            Self::Timeout {
                subscription_id, ..
            }
            | Self::UnknownSubscription { subscription_id }
            | Self::Abandoned { subscription_id } => Some(subscription_id),
            _ => None,
        }
    }
}

/// Error returned by a provider member implementation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("{0}")]
    Runtime(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("application error: {0}")]
    Application(serde_json::Value),
}

impl From<ProviderError> for RemoteException {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::Runtime(message) => RemoteException::provider_runtime(message),
            ProviderError::InvalidArguments(message) => {
                RemoteException::method_invocation(format!("invalid arguments: {message}"))
            }
            ProviderError::Application(error) => RemoteException::Application { error },
        }
    }
}
