//! Process configuration.
//!
//! Loaded from the TOML file named by `MODEL_ROUTER_CONFIG`; every field
//! has a default, so an absent variable yields a working loopback setup.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RouterError};
use crate::model::PluginConfig;
use crate::scheduler::least_request;

/// Environment variable holding the config file path.
pub const CONFIG_ENV: &str = "MODEL_ROUTER_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouterConfig {
    /// Address of the introspection server. Loopback only.
    pub debug_listen: SocketAddr,

    /// Plugins for routes without their own scheduler section.
    pub default_plugins: Vec<PluginConfig>,

    /// Newline-delimited JSON watch events applied at startup.
    pub bootstrap_events: Option<PathBuf>,

    /// Fallback tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            debug_listen: SocketAddr::from(([127, 0, 0, 1], 15000)),
            default_plugins: vec![PluginConfig::named(least_request::NAME)],
            bootstrap_events: None,
            log_filter: "info".to_string(),
        }
    }
}

impl RouterConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| RouterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the config file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RouterError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Loads from `MODEL_ROUTER_CONFIG`, or returns defaults when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.debug_listen.ip().is_loopback() {
            return Err(RouterError::Config(format!(
                "debug_listen must be a loopback address, got {}",
                self.debug_listen
            )));
        }
        if self.default_plugins.is_empty() {
            return Err(RouterError::Config(
                "default_plugins must name at least one plugin".to_string(),
            ));
        }
        if self.log_filter.trim().is_empty() {
            return Err(RouterError::Config("log_filter must not be empty".to_string()));
        }
        Ok(())
    }
}
