use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Location of the registry agent
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegistryConfig {
    /// Agent host name or address
    /// Default: "127.0.0.1"
    #[serde(default = "default_host")]
    pub host: String,

    /// Agent HTTP port
    /// Default: 8500
    #[serde(default = "default_port")]
    pub port: u16,

    /// Use https instead of http
    /// Default: false
    #[serde(default)]
    pub secure: bool,

    /// ACL token sent as `X-Consul-Token`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Datacenter to query instead of the agent's own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            secure: false,
            token: None,
            datacenter: None,
        }
    }
}

impl RegistryConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// `http(s)://host:port`
    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::InvalidConfig("registry.host cannot be empty".into()));
        }
        if self.port == 0 {
            return Err(Error::InvalidConfig("registry.port cannot be 0".into()));
        }
        Ok(())
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8500
}
