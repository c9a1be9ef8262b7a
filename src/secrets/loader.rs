//! Provider loading: configuration entry → live provider.

use super::conjur::{ConjurConfig, ConjurProvider};
use super::env_provider::EnvironmentProvider;
use super::error::{ProviderError, ResolutionError, UnsupportedVariant};
use super::file_provider::FileProvider;
use super::resolver::resolve;
use super::types::{Provider, Providers};
use crate::config::ProviderConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// The closed set of provider implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    Conjur,
    Environment,
    File,
}

impl ProviderType {
    pub const ALL: &'static [&'static str] = &["conjur", "environment", "file"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conjur => "conjur",
            Self::Environment => "environment",
            Self::File => "file",
        }
    }
}

impl FromStr for ProviderType {
    type Err = UnsupportedVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conjur" => Ok(Self::Conjur),
            "environment" => Ok(Self::Environment),
            "file" => Ok(Self::File),
            _ => Err(UnsupportedVariant {
                kind: "provider type",
                value: s.to_string(),
                expected: Self::ALL,
            }),
        }
    }
}

/// Why a provider could not be loaded. Every variant names the provider.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Unable to load provider '{name}': unrecognized provider type '{provider_type}'")]
    UnsupportedProviderType {
        name: String,
        provider_type: String,
        #[source]
        source: UnsupportedVariant,
    },

    #[error("Unable to load provider '{name}': {source}")]
    Resolution {
        name: String,
        #[source]
        source: ResolutionError,
    },

    #[error("Unable to load provider '{name}': {source}")]
    Provider {
        name: String,
        #[source]
        source: ProviderError,
    },
}

/// Turn one provider configuration into a live provider.
///
/// The provider's configuration and credentials are resolved against an
/// empty provider set, so they must be literals.
pub async fn load_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>, LoadError> {
    let name = config.name.clone();
    let provider_type =
        ProviderType::from_str(config.provider_type()).map_err(|source| {
            LoadError::UnsupportedProviderType {
                name: name.clone(),
                provider_type: config.provider_type().to_string(),
                source,
            }
        })?;

    let bootstrap = Providers::empty();
    let configuration = resolve(&bootstrap, &config.configuration)
        .await
        .map_err(|source| LoadError::Resolution {
            name: name.clone(),
            source,
        })?;
    let credentials = resolve(&bootstrap, &config.credentials)
        .await
        .map_err(|source| LoadError::Resolution {
            name: name.clone(),
            source,
        })?;

    let as_load_error = |source| LoadError::Provider {
        name: name.clone(),
        source,
    };

    let provider: Arc<dyn Provider> = match provider_type {
        ProviderType::Conjur => {
            let settings =
                ConjurConfig::from_variables(&configuration, &credentials).map_err(as_load_error)?;
            Arc::new(
                ConjurProvider::new(&name, settings)
                    .await
                    .map_err(as_load_error)?,
            )
        }
        ProviderType::Environment => Arc::new(EnvironmentProvider::new(&name)),
        ProviderType::File => {
            let root = configuration
                .optional_str("root")
                .map_err(|e| as_load_error(ProviderError::config(e.to_string())))?
                .map(PathBuf::from);
            Arc::new(FileProvider::new(&name, root))
        }
    };

    info!("Loaded provider '{}'", provider.name());
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VariableSpec;
    use std::collections::HashMap;

    fn provider_config(name: &str, provider_type: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            name: name.into(),
            provider_type: provider_type.map(String::from),
            configuration: HashMap::new(),
            credentials: HashMap::new(),
        }
    }

    #[test]
    fn provider_type_parsing() {
        assert_eq!("conjur".parse::<ProviderType>().unwrap(), ProviderType::Conjur);
        assert_eq!(ProviderType::File.as_str(), "file");
        let err = "nonexistent".parse::<ProviderType>().unwrap_err();
        assert_eq!(err.value, "nonexistent");
    }

    #[tokio::test]
    async fn unknown_type_names_provider_and_type() {
        let err = load_provider(&provider_config("vault", Some("nonexistent")))
            .await
            .err()
            .unwrap();
        match &err {
            LoadError::UnsupportedProviderType {
                name,
                provider_type,
                ..
            } => {
                assert_eq!(name, "vault");
                assert_eq!(provider_type, "nonexistent");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn type_falls_back_to_name() {
        let provider = load_provider(&provider_config("environment", None))
            .await
            .unwrap();
        assert_eq!(provider.name(), "environment");

        let err = load_provider(&provider_config("keychain", None))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("'keychain'"));
    }

    #[tokio::test]
    async fn file_provider_root_from_configuration() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("token"), b"t0k3n").unwrap();

        let mut config = provider_config("secrets-dir", Some("file"));
        config.configuration.insert(
            "root".into(),
            VariableSpec::literal(dir.path().to_str().unwrap()),
        );

        let provider = load_provider(&config).await.unwrap();
        assert_eq!(provider.value("token").await.unwrap(), b"t0k3n");
    }

    #[tokio::test]
    async fn credentials_cannot_reference_other_providers() {
        let mut config = provider_config("conjur", None);
        config.configuration.insert(
            "url".into(),
            VariableSpec::literal("https://conjur.example.com"),
        );
        config
            .configuration
            .insert("account".into(), VariableSpec::literal("myorg"));
        config
            .credentials
            .insert("username".into(), VariableSpec::literal("admin"));
        config.credentials.insert(
            "api_key".into(),
            VariableSpec::reference("environment", "CONJUR_API_KEY"),
        );

        let err = load_provider(&config).await.err().unwrap();
        match err {
            LoadError::Resolution { name, source } => {
                assert_eq!(name, "conjur");
                assert!(matches!(
                    source,
                    ResolutionError::ProviderNotFound { ref provider, .. } if provider == "environment"
                ));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
