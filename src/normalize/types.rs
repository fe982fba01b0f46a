use std::fmt::Display;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

/// Kind of a watched resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Health list of a service (passing instances only)
    Discovery,
    /// Single key/value entry
    Kv,
}

impl ResourceKind {
    /// What a payload of this kind carries, as used in error messages
    pub fn payload_label(&self) -> &'static str {
        match self {
            ResourceKind::Discovery => "connection params",
            ResourceKind::Kv => "kv data",
        }
    }
}

impl Display for ResourceKind {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            ResourceKind::Discovery => write!(f, "discovery"),
            ResourceKind::Kv => write!(f, "kv"),
        }
    }
}

/// One reachable instance of a discovered service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionEndpoint {
    pub host: String,
    pub port: String,
}

impl ConnectionEndpoint {
    pub fn new(
        host: impl Into<String>,
        port: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }
}

//-----------------------------------------------------------
// Raw registry payloads

/// Consul reports ports as numbers; older agents and test fixtures use strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Number(u64),
    Text(String),
}

impl Display for PortValue {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            PortValue::Number(n) => write!(f, "{n}"),
            PortValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<u16> for PortValue {
    fn from(port: u16) -> Self {
        PortValue::Number(port as u64)
    }
}

impl From<&str> for PortValue {
    fn from(port: &str) -> Self {
        PortValue::Text(port.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeInfo {
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceInfo {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub port: Option<PortValue>,
}

/// One element of `/v1/health/service/<name>`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthEntry {
    #[serde(default)]
    pub node: Option<NodeInfo>,
    #[serde(default)]
    pub service: Option<ServiceInfo>,
}

impl HealthEntry {
    pub fn new(
        service_address: Option<&str>,
        port: Option<PortValue>,
        node_address: Option<&str>,
    ) -> Self {
        Self {
            node: node_address.map(|address| NodeInfo {
                address: Some(address.to_string()),
            }),
            service: Some(ServiceInfo {
                address: service_address.map(str::to_string),
                port,
            }),
        }
    }
}

/// One record of `/v1/kv/<key>` with its value already decoded
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawKvRecord {
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
    #[serde(default)]
    pub lock_index: u64,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub flags: u64,
    #[serde(default)]
    pub value: Option<String>,
    /// Fields this crate does not model (e.g. `Session`)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What a subscription delivers on change
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    Discovery(Vec<HealthEntry>),
    /// `None` when the key does not exist
    Kv(Option<RawKvRecord>),
}

impl RawPayload {
    pub fn kind(&self) -> ResourceKind {
        match self {
            RawPayload::Discovery(_) => ResourceKind::Discovery,
            RawPayload::Kv(_) => ResourceKind::Kv,
        }
    }
}

//-----------------------------------------------------------
// Normalized forms

/// Flattened KV record with lower-camel-case keys
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedKvRecord {
    pub create_index: u64,
    pub modify_index: u64,
    pub lock_index: u64,
    pub key: String,
    pub flags: u64,
    /// `None` means there is no data for the key yet
    pub value: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Cached value of a resource
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceData {
    Discovery(Vec<ConnectionEndpoint>),
    Kv(NormalizedKvRecord),
}

impl ResourceData {
    pub fn empty(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Discovery => ResourceData::Discovery(Vec::new()),
            ResourceKind::Kv => ResourceData::Kv(NormalizedKvRecord::default()),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceData::Discovery(_) => ResourceKind::Discovery,
            ResourceData::Kv(_) => ResourceKind::Kv,
        }
    }

    /// At least one endpoint, or a KV value that is present (an empty string counts)
    pub fn is_usable(&self) -> bool {
        match self {
            ResourceData::Discovery(endpoints) => !endpoints.is_empty(),
            ResourceData::Kv(record) => record.value.is_some(),
        }
    }

    pub fn as_connections(&self) -> Option<&[ConnectionEndpoint]> {
        match self {
            ResourceData::Discovery(endpoints) => Some(endpoints),
            ResourceData::Kv(_) => None,
        }
    }

    pub fn as_kv(&self) -> Option<&NormalizedKvRecord> {
        match self {
            ResourceData::Kv(record) => Some(record),
            ResourceData::Discovery(_) => None,
        }
    }
}
