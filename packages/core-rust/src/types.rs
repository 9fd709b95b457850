//! Endpoint identity types shared by proxies and providers.

use serde::{Deserialize, Serialize};

/// Interface version advertised by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub major_version: u32,
    pub minor_version: u32,
}

impl Version {
    #[must_use]
    pub fn new(major_version: u32, minor_version: u32) -> Self {
        Self {
            major_version,
            minor_version,
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major_version, self.minor_version)
    }
}

/// Metadata identifying one concrete provider instance.
///
/// How an entry is obtained (discovery, arbitration) is not the concern of
/// this crate; the runtime only uses it to address outbound messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryEntry {
    /// Domain the provider is registered in.
    pub domain: String,
    /// Fully qualified interface name, e.g. `vehicle/Radio`.
    pub interface_name: String,
    /// Participant id of the provider endpoint.
    pub participant_id: String,
    /// Version of the implemented interface.
    pub provider_version: Version,
    /// Whether the provider lives in the same process as the proxy.
    #[serde(default)]
    pub is_local: bool,
}

impl DiscoveryEntry {
    #[must_use]
    pub fn new(
        domain: impl Into<String>,
        interface_name: impl Into<String>,
        participant_id: impl Into<String>,
        provider_version: Version,
    ) -> Self {
        Self {
            domain: domain.into(),
            interface_name: interface_name.into(),
            participant_id: participant_id.into(),
            provider_version,
            is_local: false,
        }
    }

    /// Marks the entry as describing an in-process provider.
    #[must_use]
    pub fn local(mut self) -> Self {
        self.is_local = true;
        self
    }
}
