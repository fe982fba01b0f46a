//! Configuration for the discovery cache.
//!
//! Loaded hierarchically, later sources overriding earlier ones:
//! 1. Default values from code
//! 2. Configuration file named by `CONSUL_DISCOVERY_CONFIG` (if set)
//! 3. Environment variables with the `CONSUL_DISCOVERY__` prefix
mod registry;
mod retry;
mod watch;
pub use registry::*;
pub use retry::*;
pub use watch::*;


use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

pub const CONFIG_PATH_ENV: &str = "CONSUL_DISCOVERY_CONFIG";
pub const ENV_PREFIX: &str = "CONSUL_DISCOVERY";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct DiscoveryConfig {
    /// Where the registry agent lives and how to authenticate
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Long-poll and retry tuning for watches
    #[serde(default)]
    pub watch: WatchConfig,
}

impl DiscoveryConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("CONSUL_DISCOVERY__REGISTRY__HOST", "consul.service");
    /// let cfg = DiscoveryConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        let config: Self = builder.add_source(env_source()).build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies overrides from `path` on top of the current values.
    /// Environment variables still win.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated instance
    pub fn validate(self) -> Result<Self> {
        self.registry.validate()?;
        self.watch.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}
