//! Remote exception taxonomy.
//!
//! Errors raised on the far side of a call travel as data inside replies and
//! publications. Each variant is tagged with `_typeName` on the wire so peers
//! written in other languages can reconstruct the matching exception class.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Version;

/// An exception carried in `Reply.error`, `SubscriptionReply.error` or a
/// publication's `error` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "_typeName")]
pub enum RemoteException {
    /// Unknown callee, unresolved member name, or a failure inside the
    /// invoked member.
    #[serde(
        rename = "conduit.exceptions.MethodInvocationException",
        rename_all = "camelCase"
    )]
    #[error("method invocation failed: {detail_message}")]
    MethodInvocation {
        detail_message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_version: Option<Version>,
    },

    /// Runtime failure reported by the provider implementation itself.
    #[serde(
        rename = "conduit.exceptions.ProviderRuntimeException",
        rename_all = "camelCase"
    )]
    #[error("provider runtime error: {detail_message}")]
    ProviderRuntime { detail_message: String },

    /// The subscription registration was rejected.
    #[serde(
        rename = "conduit.exceptions.SubscriptionException",
        rename_all = "camelCase"
    )]
    #[error("subscription {subscription_id} failed: {detail_message}")]
    Subscription {
        detail_message: String,
        subscription_id: String,
    },

    /// An expected periodic publication did not arrive in time.
    #[serde(
        rename = "conduit.exceptions.PublicationMissedException",
        rename_all = "camelCase"
    )]
    #[error("publication missed for subscription {subscription_id}")]
    PublicationMissed {
        detail_message: String,
        subscription_id: String,
    },

    /// Application-defined error enumeration raised by an operation.
    #[serde(
        rename = "conduit.exceptions.ApplicationException",
        rename_all = "camelCase"
    )]
    #[error("application error: {error}")]
    Application { error: Value },
}

impl RemoteException {
    #[must_use]
    pub fn method_invocation(detail_message: impl Into<String>) -> Self {
        Self::MethodInvocation {
            detail_message: detail_message.into(),
            provider_version: None,
        }
    }

    #[must_use]
    pub fn provider_runtime(detail_message: impl Into<String>) -> Self {
        Self::ProviderRuntime {
            detail_message: detail_message.into(),
        }
    }

    #[must_use]
    pub fn subscription(subscription_id: impl Into<String>, detail_message: impl Into<String>) -> Self {
        Self::Subscription {
            detail_message: detail_message.into(),
            subscription_id: subscription_id.into(),
        }
    }

    #[must_use]
    pub fn publication_missed(subscription_id: impl Into<String>) -> Self {
        let subscription_id = subscription_id.into();
        Self::PublicationMissed {
            detail_message: format!("no publication received for {subscription_id} within the alert interval"),
            subscription_id,
        }
    }

    /// Subscription id carried by subscription-related variants.
    #[must_use]
    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            Self::Subscription {
                subscription_id, ..
            }
            | Self::PublicationMissed {
                subscription_id, ..
            } => Some(subscription_id),
            _ => None,
        }
    }

    /// Human-readable detail, without the variant prefix.
    #[must_use]
    pub fn detail_message(&self) -> String {
        match self {
            Self::MethodInvocation { detail_message, .. }
            | Self::ProviderRuntime { detail_message }
            | Self::Subscription { detail_message, .. }
            | Self::PublicationMissed { detail_message, .. } => detail_message.clone(),
            Self::Application { error } => error.to_string(),
        }
    }
}
