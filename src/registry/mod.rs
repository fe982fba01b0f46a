//! Boundary to the registry (Consul).
//!
//! The cache only needs a watch primitive plus a handful of agent and KV
//! calls. [`ConsulClient`] talks HTTP to a real agent; [`InMemoryRegistry`]
//! keeps everything in process and lets the holder push events.

mod consul;
mod memory;
mod subscription;
pub use consul::*;
pub use memory::*;
pub use subscription::*;


use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;

use crate::DiscoveryConfig;
use crate::RegistryError;
use crate::ResourceKind;
use crate::Result;

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Starts a long-poll watch on a service health list or a KV key
    fn watch(
        &self,
        kind: ResourceKind,
        name: &str,
    ) -> Subscription;

    /// Registers a service instance with the local agent
    async fn register_service(
        &self,
        registration: &ServiceRegistration,
    ) -> RegistryResult<()>;

    /// Services known to the local agent, keyed by service id
    async fn list_services(&self) -> RegistryResult<HashMap<String, AgentService>>;

    async fn kv_set(
        &self,
        key: &str,
        value: &str,
    ) -> RegistryResult<bool>;
}

/// Builds the registry client a discovery service talks to
pub trait RegistryClientFactory: Send + Sync {
    fn create(
        &self,
        config: &DiscoveryConfig,
    ) -> Result<Arc<dyn RegistryClient>>;
}

/// Body of `PUT /v1/agent/service/register`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceRegistration {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<ServiceCheck>,
}

impl ServiceRegistration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_id(
        mut self,
        id: impl Into<String>,
    ) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_address(
        mut self,
        address: impl Into<String>,
    ) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_port(
        mut self,
        port: u16,
    ) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_tags(
        mut self,
        tags: Vec<String>,
    ) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_check(
        mut self,
        check: ServiceCheck,
    ) -> Self {
        self.check = Some(check);
        self
    }

    /// The id the agent stores the instance under: the explicit id, else the name
    pub fn identity(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }
}

/// Health check attached to a registration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceCheck {
    #[serde(rename = "HTTP", default, skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,
    #[serde(rename = "TCP", default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<String>,
    #[serde(rename = "TTL", default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deregister_critical_service_after: Option<String>,
}

/// Entry of `GET /v1/agent/services`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentService {
    #[serde(rename = "ID")]
    pub id: String,
    pub service: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
}

impl From<&ServiceRegistration> for AgentService {
    fn from(registration: &ServiceRegistration) -> Self {
        Self {
            id: registration.identity().to_string(),
            service: registration.name.clone(),
            tags: registration.tags.clone(),
            address: registration.address.clone().unwrap_or_default(),
            port: registration.port.unwrap_or_default(),
        }
    }
}
