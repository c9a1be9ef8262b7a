//! Environment variable secret provider.
//!
//! Resolves ids by reading them from the proxy's own process environment.

use super::error::ProviderError;
use super::types::Provider;
use async_trait::async_trait;

/// Resolves secrets from environment variables.
pub struct EnvironmentProvider {
    name: String,
}

impl EnvironmentProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Provider for EnvironmentProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn value(&self, id: &str) -> Result<Vec<u8>, ProviderError> {
        match std::env::var_os(id) {
            Some(value) => Ok(value.into_encoded_bytes()),
            None => Err(ProviderError::not_found(format!(
                "environment variable '{id}' is not set"
            ))),
        }
    }
}
