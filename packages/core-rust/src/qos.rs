//! Quality-of-service settings for messages and subscriptions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Sentinel `expiry_date_ms` meaning "the subscription never expires".
pub const NO_EXPIRY_DATE: u64 = 0;

/// Ceiling for any messaging ttl: 30 days.
pub const MAX_MESSAGING_TTL_MS: u64 = 2_592_000_000;

/// Ttl of messages sent without explicit QoS.
pub const DEFAULT_MESSAGING_TTL_MS: u64 = 60_000;

/// Default `publication_ttl_ms` of a [`SubscriptionQos`].
pub const DEFAULT_PUBLICATION_TTL_MS: u64 = 10_000;

/// Delivery effort requested for a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessagingQosEffort {
    #[default]
    Normal,
    BestEffort,
}

/// Per-message QoS handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagingQos {
    /// Relative time-to-live in milliseconds.
    pub ttl_ms: u64,
    pub effort: MessagingQosEffort,
    pub compress: bool,
    /// Application headers copied onto the wire envelope.
    pub custom_headers: BTreeMap<String, String>,
}

impl MessagingQos {
    #[must_use]
    pub fn with_ttl(ttl_ms: u64) -> Self {
        Self {
            ttl_ms,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.insert(key.into(), value.into());
        self
    }
}

impl Default for MessagingQos {
    fn default() -> Self {
        Self {
            ttl_ms: DEFAULT_MESSAGING_TTL_MS,
            effort: MessagingQosEffort::Normal,
            compress: false,
            custom_headers: BTreeMap::new(),
        }
    }
}

/// QoS of one subscription, sent to the provider as part of the request.
///
/// `max_interval_ms` is only meaningful for on-change-with-keep-alive
/// subscriptions; `alert_after_interval_ms` arms the missed-publication
/// alert on the proxy side when present and non-zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionQos {
    /// Absolute end of the subscription, or [`NO_EXPIRY_DATE`].
    pub expiry_date_ms: u64,
    pub publication_ttl_ms: u64,
    #[serde(default)]
    pub min_interval_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_after_interval_ms: Option<u64>,
}

impl SubscriptionQos {
    /// Subscription that ends `validity_ms` after `now_ms`.
    #[must_use]
    pub fn valid_for(now_ms: u64, validity_ms: u64) -> Self {
        Self {
            expiry_date_ms: now_ms.saturating_add(validity_ms),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_alert_after_interval(mut self, interval_ms: u64) -> Self {
        self.alert_after_interval_ms = Some(interval_ms);
        self
    }

    #[must_use]
    pub fn with_intervals(mut self, min_interval_ms: u64, max_interval_ms: u64) -> Self {
        self.min_interval_ms = min_interval_ms;
        self.max_interval_ms = Some(max_interval_ms);
        self
    }

    #[must_use]
    pub fn has_expiry(&self) -> bool {
        self.expiry_date_ms != NO_EXPIRY_DATE
    }

    /// Alert period, if alerting is enabled. Zero disables alerting.
    #[must_use]
    pub fn alert_interval(&self) -> Option<u64> {
        self.alert_after_interval_ms.filter(|interval| *interval > 0)
    }
}

impl Default for SubscriptionQos {
    fn default() -> Self {
        Self {
            expiry_date_ms: NO_EXPIRY_DATE,
            publication_ttl_ms: DEFAULT_PUBLICATION_TTL_MS,
            min_interval_ms: 0,
            max_interval_ms: None,
            alert_after_interval_ms: None,
        }
    }
}
