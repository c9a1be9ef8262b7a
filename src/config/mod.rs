mod defaults;
mod io;
mod types;
mod validation;

pub use defaults::*;
pub use io::*;
pub use types::*;
pub use validation::*;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Top-level proxy configuration.
///
/// Read once at startup and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub listeners: Vec<ListenerConfig>,
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
}

impl Config {
    /// Load configuration from the given file, or from the first file found
    /// in the standard locations.
    pub fn load(path: Option<&str>) -> Result<Self> {
        match Self::load_optional(path)? {
            Some(config) => Ok(config),
            None => bail!(
                "No configuration file found (looked for {} and ~/.secretless/secretless.yml)",
                DEFAULT_CONFIG_FILES.join(", ")
            ),
        }
    }

    /// Like [`Config::load`], but `Ok(None)` when no path was given and no
    /// file exists in the standard locations.
    pub fn load_optional(path: Option<&str>) -> Result<Option<Self>> {
        let Some(config_path) = path.map(PathBuf::from).or_else(find_config_file) else {
            return Ok(None);
        };

        info!("Loading config from {}", config_path.display());
        load_config_file(&config_path).map(Some)
    }
}

/// Handlers in `handlers` that serve the named listener, in order.
pub fn handlers_for<'a>(
    handlers: &'a [HandlerConfig],
    listener: &'a str,
) -> impl Iterator<Item = &'a HandlerConfig> + 'a {
    handlers.iter().filter(move |h| h.listener_name() == listener)
}

/// Find the configuration file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in DEFAULT_CONFIG_FILES {
        let path = PathBuf::from(name);
        if path.exists() {
            return Some(path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        let home_config = home.join(".secretless").join("secretless.yml");
        if home_config.exists() {
            return Some(home_config);
        }
    }

    None
}
