//! Subscription request, reply, stop and publication payloads.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::exception::RemoteException;
use crate::qos::SubscriptionQos;

/// Attribute subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub subscription_id: String,
    /// Attribute name.
    pub subscribed_to_name: String,
    pub qos: SubscriptionQos,
}

/// Filter values applied by the provider to a selective broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastFilterParameters {
    pub filter_parameters: BTreeMap<String, String>,
}

/// Mismatch between supplied and declared filter parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("filter parameters do not match the declared set (missing: {missing:?}, unknown: {unknown:?})")]
pub struct FilterParameterError {
    pub missing: Vec<String>,
    pub unknown: Vec<String>,
}

impl BroadcastFilterParameters {
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter_parameters.insert(name.into(), value.into());
        self
    }

    /// Checks that exactly the declared filter parameters were supplied.
    ///
    /// # Errors
    ///
    /// Returns [`FilterParameterError`] listing missing and unknown names.
    pub fn validate(&self, declared: &[String]) -> Result<(), FilterParameterError> {
        let declared: BTreeSet<&str> = declared.iter().map(String::as_str).collect();
        let supplied: BTreeSet<&str> = self.filter_parameters.keys().map(String::as_str).collect();

        let missing: Vec<String> = declared.difference(&supplied).map(|s| (*s).to_string()).collect();
        let unknown: Vec<String> = supplied.difference(&declared).map(|s| (*s).to_string()).collect();

        if missing.is_empty() && unknown.is_empty() {
            Ok(())
        } else {
            Err(FilterParameterError { missing, unknown })
        }
    }
}

/// Selective (unicast-addressable) broadcast subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastSubscriptionRequest {
    pub subscription_id: String,
    /// Broadcast name.
    pub subscribed_to_name: String,
    pub qos: SubscriptionQos,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_parameters: Option<BroadcastFilterParameters>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<String>,
}

/// Non-selective broadcast subscription addressed by multicast id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MulticastSubscriptionRequest {
    pub subscription_id: String,
    pub subscribed_to_name: String,
    pub qos: SubscriptionQos,
    pub multicast_id: String,
}

/// Provider acknowledgement of a subscription request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionReply {
    pub subscription_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteException>,
}

impl SubscriptionReply {
    #[must_use]
    pub fn accepted(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            error: None,
        }
    }

    #[must_use]
    pub fn rejected(subscription_id: impl Into<String>, error: RemoteException) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStop {
    pub subscription_id: String,
}

/// Publication delivered to a single subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPublication {
    pub subscription_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteException>,
}

impl SubscriptionPublication {
    #[must_use]
    pub fn new(subscription_id: impl Into<String>, response: Vec<Value>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            response: Some(response),
            error: None,
        }
    }
}

/// Publication delivered to every local subscriber of a multicast id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MulticastPublication {
    pub multicast_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteException>,
}

impl MulticastPublication {
    #[must_use]
    pub fn new(multicast_id: impl Into<String>, response: Vec<Value>) -> Self {
        Self {
            multicast_id: multicast_id.into(),
            response: Some(response),
            error: None,
        }
    }
}
