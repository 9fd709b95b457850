//! Wire envelope wrapping every payload exchanged with the transport.
//!
//! Envelopes and payloads both use named `MsgPack` (`rmp_serde::to_vec_named`)
//! with camelCase field names. The payload is kept as an opaque byte string
//! so the envelope can be routed without decoding it.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::qos::{MessagingQos, MessagingQosEffort};

/// Kind of payload carried by a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    Request,
    OneWay,
    Reply,
    SubscriptionRequest,
    BroadcastSubscriptionRequest,
    MulticastSubscriptionRequest,
    SubscriptionReply,
    SubscriptionStop,
    Publication,
    Multicast,
}

/// Failure while building or reading an envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// A routed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub message_type: MessageType,
    /// Sender participant id.
    pub from: String,
    /// Recipient participant id, or multicast id for multicast publications.
    pub to: String,
    /// Absolute expiry in milliseconds since Unix epoch.
    pub expiry_date_ms: u64,
    #[serde(default)]
    pub effort: MessagingQosEffort,
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_headers: BTreeMap<String, String>,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl Message {
    /// Builds an envelope around `payload` with no expiry and default QoS.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] if the payload cannot be serialized.
    pub fn new<T: Serialize>(
        id: impl Into<String>,
        message_type: MessageType,
        from: impl Into<String>,
        to: impl Into<String>,
        payload: &T,
    ) -> Result<Self, EnvelopeError> {
        Ok(Self {
            id: id.into(),
            message_type,
            from: from.into(),
            to: to.into(),
            expiry_date_ms: 0,
            effort: MessagingQosEffort::Normal,
            compress: false,
            is_local: false,
            custom_headers: BTreeMap::new(),
            payload: rmp_serde::to_vec_named(payload)?,
        })
    }

    #[must_use]
    pub fn with_expiry_date(mut self, expiry_date_ms: u64) -> Self {
        self.expiry_date_ms = expiry_date_ms;
        self
    }

    /// Copies effort, compression and custom headers from `qos`.
    #[must_use]
    pub fn with_qos(mut self, qos: &MessagingQos) -> Self {
        self.effort = qos.effort;
        self.compress = qos.compress;
        self.custom_headers.clone_from(&qos.custom_headers);
        self
    }

    #[must_use]
    pub fn local(mut self, is_local: bool) -> Self {
        self.is_local = is_local;
        self
    }

    /// Decodes the payload as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Decode`] if the payload does not match `T`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        Ok(rmp_serde::from_slice(&self.payload)?)
    }

    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] on serialization failure.
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// # Errors
    ///
    /// Returns [`EnvelopeError::Decode`] if `bytes` is not a valid envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
