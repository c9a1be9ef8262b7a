use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

// ============================================================================
// Variable Specs
// ============================================================================

/// A configured value: either a literal, or a reference to a secret held by a
/// named provider.
///
/// In YAML a literal is any scalar; a reference is a mapping:
///
/// ```yaml
/// username: app
/// password: { provider: conjur, id: db/password }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum VariableSpec {
    Reference { provider: String, id: String },
    Literal(String),
}

impl VariableSpec {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    pub fn reference(provider: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Reference {
            provider: provider.into(),
            id: id.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawVariableSpec {
    Reference {
        provider: String,
        #[serde(alias = "path")]
        id: String,
    },
    Text(String),
    Bool(bool),
    Number(serde_json::Number),
}

impl<'de> Deserialize<'de> for VariableSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawVariableSpec::deserialize(deserializer)? {
            RawVariableSpec::Reference { provider, id } => Self::Reference { provider, id },
            RawVariableSpec::Text(s) => Self::Literal(s),
            RawVariableSpec::Bool(b) => Self::Literal(b.to_string()),
            RawVariableSpec::Number(n) => Self::Literal(n.to_string()),
        })
    }
}

/// Field name → spec.
pub type VariableSpecs = HashMap<String, VariableSpec>;

// ============================================================================
// Providers
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub name: String,
    /// Provider implementation; defaults to `name`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub provider_type: Option<String>,
    #[serde(default)]
    pub configuration: VariableSpecs,
    #[serde(default)]
    pub credentials: VariableSpecs,
}

impl ProviderConfig {
    /// The effective provider type.
    pub fn provider_type(&self) -> &str {
        self.provider_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.name)
    }
}

// ============================================================================
// Listeners
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListenerConfig {
    pub name: String,
    /// Wire protocol; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Network address (`host:port`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Local-domain socket path, used when `address` is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket: Option<PathBuf>,
}

impl ListenerConfig {
    /// The effective protocol identifier.
    pub fn protocol(&self) -> &str {
        self.protocol
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.name)
    }
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HandlerConfig {
    pub name: String,
    /// Listener this handler serves; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listener: Option<String>,
    #[serde(default)]
    pub debug: bool,
    /// Request URL patterns (HTTP listeners only).
    #[serde(rename = "match", default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub credentials: VariableSpecs,
}

impl HandlerConfig {
    pub fn listener_name(&self) -> &str {
        self.listener
            .as_deref()
            .filter(|l| !l.is_empty())
            .unwrap_or(&self.name)
    }
}
