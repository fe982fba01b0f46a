use std::fmt::Debug;
use std::sync::Arc;

use crate::ConsulClientFactory;
use crate::DiscoveryConfig;
use crate::RegistryClientFactory;
use crate::Result;

/// Everything a discovery service is built from.
///
/// Built once and never mutated; each service gets its own context.
#[derive(Clone)]
pub struct DiscoveryContext {
    pub config: DiscoveryConfig,
    pub registry_factory: Arc<dyn RegistryClientFactory>,
}

impl DiscoveryContext {
    pub fn builder() -> DiscoveryContextBuilder {
        DiscoveryContextBuilder::default()
    }
}

impl Debug for DiscoveryContext {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DiscoveryContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct DiscoveryContextBuilder {
    config: Option<DiscoveryConfig>,
    registry_address: Option<(String, u16)>,
    registry_factory: Option<Arc<dyn RegistryClientFactory>>,
}

impl DiscoveryContextBuilder {
    /// Uses `config` instead of loading it from the file and environment
    pub fn config(
        mut self,
        config: DiscoveryConfig,
    ) -> Self {
        self.config = Some(config);
        self
    }

    /// Points the service at another agent, keeping the rest of the config
    pub fn registry(
        mut self,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        self.registry_address = Some((host.into(), port));
        self
    }

    /// Replaces how the registry client is constructed (default: [`ConsulClientFactory`])
    pub fn registry_factory(
        mut self,
        factory: Arc<dyn RegistryClientFactory>,
    ) -> Self {
        self.registry_factory = Some(factory);
        self
    }

    /// Validates the configuration and freezes the context.
    ///
    /// Without an explicit config, [`DiscoveryConfig::new`] loads one.
    pub fn build(self) -> Result<DiscoveryContext> {
        let mut config = match self.config {
            Some(config) => config,
            None => DiscoveryConfig::new()?,
        };
        if let Some((host, port)) = self.registry_address {
            config.registry.host = host;
            config.registry.port = port;
        }

        Ok(DiscoveryContext {
            config: config.validate()?,
            registry_factory: self.registry_factory.unwrap_or_else(|| Arc::new(ConsulClientFactory)),
        })
    }
}
