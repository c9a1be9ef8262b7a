use super::Config;
use anyhow::Result;
use std::collections::HashSet;
use tracing::warn;

/// Validation errors for configuration.
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

fn push(errors: &mut Vec<ConfigValidationError>, path: String, message: &str) {
    errors.push(ConfigValidationError {
        path,
        message: message.to_string(),
    });
}

/// Structural checks on a configuration object.
///
/// Provider types and listener protocols are not checked here;
/// an unknown one is fatal when the proxy tries to load or dispatch it.
pub fn validate_config(config: &Config) -> Vec<ConfigValidationError> {
    let mut errors = Vec::new();

    let mut provider_names = HashSet::new();
    for (i, provider) in config.providers.iter().enumerate() {
        if provider.name.is_empty() {
            push(&mut errors, format!("providers[{i}].name"), "Provider name is required");
        } else if !provider_names.insert(provider.name.as_str()) {
            push(
                &mut errors,
                format!("providers[{i}].name"),
                "Provider name is already in use",
            );
        }
    }

    let mut listener_names = HashSet::new();
    for (i, listener) in config.listeners.iter().enumerate() {
        if listener.name.is_empty() {
            push(&mut errors, format!("listeners[{i}].name"), "Listener name is required");
        } else if !listener_names.insert(listener.name.as_str()) {
            push(
                &mut errors,
                format!("listeners[{i}].name"),
                "Listener name is already in use",
            );
        }

        match (&listener.address, &listener.socket) {
            (Some(_), Some(_)) => push(
                &mut errors,
                format!("listeners[{i}]"),
                "Exactly one of 'address' or 'socket' may be set",
            ),
            (None, None) => push(
                &mut errors,
                format!("listeners[{i}]"),
                "One of 'address' or 'socket' is required",
            ),
            _ => {}
        }
    }

    let http_listeners: HashSet<&str> = config
        .listeners
        .iter()
        .filter(|l| l.protocol() == "http")
        .map(|l| l.name.as_str())
        .collect();

    for (i, handler) in config.handlers.iter().enumerate() {
        if handler.name.is_empty() {
            push(&mut errors, format!("handlers[{i}].name"), "Handler name is required");
            continue;
        }
        if !listener_names.contains(handler.listener_name()) {
            push(
                &mut errors,
                format!("handlers[{i}].listener"),
                "Handler refers to a listener that is not configured",
            );
        }
        if handler.patterns.is_empty() && http_listeners.contains(handler.listener_name()) {
            push(
                &mut errors,
                format!("handlers[{i}].match"),
                "HTTP handlers need at least one 'match' pattern",
            );
        }
        for pattern in &handler.patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                errors.push(ConfigValidationError {
                    path: format!("handlers[{i}].match"),
                    message: format!("Invalid pattern '{pattern}': {e}"),
                });
            }
        }
    }

    if config.listeners.is_empty() {
        warn!("No listeners are configured");
    }

    errors
}

/// Validate configuration and return Result.
pub fn validate_config_object(config: &Config) -> Result<()> {
    let errors = validate_config(config);
    if errors.is_empty() {
        Ok(())
    } else {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        anyhow::bail!("Configuration validation failed:\n{}", messages.join("\n"));
    }
}
