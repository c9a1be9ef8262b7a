use super::defaults::MAX_CONFIG_FILE_BYTES;
use super::Config;
use anyhow::{bail, Context, Result};
use std::path::Path;

/// Read and parse a configuration file, picking the format by extension.
///
/// YAML (`.yml`/`.yaml`) and TOML are parsed directly; anything else is
/// treated as JSON5, falling back to strict JSON for a better error message.
pub fn load_config_file(path: &Path) -> Result<Config> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Cannot stat config file '{}'", path.display()))?;

    if metadata.len() > MAX_CONFIG_FILE_BYTES {
        bail!(
            "Config file '{}' is {} bytes, exceeds limit of {} bytes",
            path.display(),
            metadata.len(),
            MAX_CONFIG_FILE_BYTES,
        );
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;

    parse_config(&content, path.extension().and_then(|e| e.to_str()))
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

/// Parse configuration text in the format named by `ext`.
pub fn parse_config(content: &str, ext: Option<&str>) -> Result<Config> {
    let config = match ext {
        Some("yaml") | Some("yml") => serde_yaml::from_str(content)?,
        Some("toml") => toml::from_str(content)?,
        _ => match json5::from_str(content) {
            Ok(config) => config,
            Err(_) => serde_json::from_str(content)?,
        },
    };
    Ok(config)
}
