//! Request, one-way request and reply payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::exception::RemoteException;

/// Invocation of an operation or synthesized attribute accessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Operation name, or `get<Attribute>`/`set<Attribute>` for accessors.
    pub method_name: String,
    /// Declared type name of each entry in `params`.
    #[serde(default)]
    pub param_datatypes: Vec<String>,
    #[serde(default)]
    pub params: Vec<Value>,
    /// Correlation key echoed by the matching [`Reply`].
    pub request_reply_id: String,
}

impl Request {
    #[must_use]
    pub fn new(
        method_name: impl Into<String>,
        params: Vec<Value>,
        param_datatypes: Vec<String>,
        request_reply_id: impl Into<String>,
    ) -> Self {
        Self {
            method_name: method_name.into(),
            param_datatypes,
            params,
            request_reply_id: request_reply_id.into(),
        }
    }
}

/// Fire-and-forget invocation; never answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneWayRequest {
    pub method_name: String,
    #[serde(default)]
    pub param_datatypes: Vec<String>,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// Answer to a [`Request`]. Exactly one of `response` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub request_reply_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteException>,
}

impl Reply {
    #[must_use]
    pub fn success(request_reply_id: impl Into<String>, response: Vec<Value>) -> Self {
        Self {
            request_reply_id: request_reply_id.into(),
            response: Some(response),
            error: None,
        }
    }

    #[must_use]
    pub fn failure(request_reply_id: impl Into<String>, error: RemoteException) -> Self {
        Self {
            request_reply_id: request_reply_id.into(),
            response: None,
            error: Some(error),
        }
    }

    /// Converts the reply into a `Result`, treating a reply without either
    /// field as an empty response.
    ///
    /// # Errors
    ///
    /// Returns the carried [`RemoteException`] when `error` is set.
    pub fn into_result(self) -> Result<Vec<Value>, RemoteException> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.response.unwrap_or_default()),
        }
    }
}
