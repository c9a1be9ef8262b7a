//! Variable resolution: turns a map of literal-or-reference specs into a map
//! of literal values.
//!
//! References are looked up by provider identity in the set passed in. When
//! providers are bootstrapped that set is empty, so a provider's own
//! configuration and credentials can only be literals.

use super::error::ResolutionError;
use super::types::{Providers, Variables};
use crate::config::{VariableSpec, VariableSpecs};
use std::collections::HashMap;
use tracing::debug;

/// Resolve every entry of `specs` against `providers`.
///
/// Fails on the first reference whose provider is missing or whose
/// retrieval fails. Literal-only maps never touch a provider.
pub async fn resolve(
    providers: &Providers,
    specs: &VariableSpecs,
) -> Result<Variables, ResolutionError> {
    let mut values = HashMap::with_capacity(specs.len());

    for (name, spec) in specs {
        let value = resolve_one(providers, name, spec).await?;
        values.insert(name.clone(), value);
    }

    Ok(Variables::new(values))
}

/// Resolve a single named spec.
pub async fn resolve_one(
    providers: &Providers,
    name: &str,
    spec: &VariableSpec,
) -> Result<Vec<u8>, ResolutionError> {
    match spec {
        VariableSpec::Literal(value) => Ok(value.as_bytes().to_vec()),
        VariableSpec::Reference { provider, id } => {
            let p = providers
                .find(provider)
                .ok_or_else(|| ResolutionError::ProviderNotFound {
                    variable: name.to_string(),
                    provider: provider.clone(),
                })?;

            debug!("Resolving variable '{}' via provider '{}'", name, provider);

            p.value(id)
                .await
                .map_err(|source| ResolutionError::Retrieval {
                    variable: name.to_string(),
                    provider: provider.clone(),
                    id: id.clone(),
                    source,
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::{Provider, ProviderError};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// In-memory provider that counts lookups.
    struct MapProvider {
        name: String,
        values: HashMap<String, String>,
        calls: AtomicUsize,
    }

    impl MapProvider {
        fn new(name: &str, values: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                values: values
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Provider for MapProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn value(&self, id: &str) -> Result<Vec<u8>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.values
                .get(id)
                .map(|v| v.as_bytes().to_vec())
                .ok_or_else(|| ProviderError::not_found(id))
        }
    }

    fn specs(entries: Vec<(&str, VariableSpec)>) -> VariableSpecs {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }


    #[tokio::test]
    async fn literal_and_reference() {
        let p = MapProvider::new("p", &[("secret/y", "Z")]);
        let providers = Providers::new(vec![p.clone() as Arc<dyn Provider>]);
        let specs = specs(vec![
            ("a", VariableSpec::literal("x")),
            ("b", VariableSpec::reference("p", "secret/y")),
        ]);

        let resolved = resolve(&providers, &specs).await.unwrap();

        let expected: HashMap<String, Vec<u8>> = [("a", "x"), ("b", "Z")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect();
        assert_eq!(resolved, Variables::new(expected));
        assert_eq!(p.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_provider_is_named() {
        let providers = Providers::new(vec![MapProvider::new("p", &[]) as Arc<dyn Provider>]);
        let specs = specs(vec![("b", VariableSpec::reference("q", "secret/y"))]);

        let err = resolve(&providers, &specs).await.unwrap_err();
        match &err {
            ResolutionError::ProviderNotFound { variable, provider } => {
                assert_eq!(variable, "b");
                assert_eq!(provider, "q");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("'q'"));
    }

    #[tokio::test]
    async fn retrieval_failure_propagates_cause() {
        let providers = Providers::new(vec![MapProvider::new("p", &[]) as Arc<dyn Provider>]);
        let specs = specs(vec![("b", VariableSpec::reference("p", "secret/absent"))]);

        let err = resolve(&providers, &specs).await.unwrap_err();
        match err {
            ResolutionError::Retrieval { id, source, .. } => {
                assert_eq!(id, "secret/absent");
                assert!(matches!(source, ProviderError::NotFound { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn literal_only_resolution_is_pure() {
        let p = MapProvider::new("p", &[("secret/y", "Z")]);
        let providers = Providers::new(vec![p.clone() as Arc<dyn Provider>]);
        let specs = specs(vec![
            ("host", VariableSpec::literal("db.internal")),
            ("port", VariableSpec::literal("5432")),
        ]);

        let first = resolve(&providers, &specs).await.unwrap();
        let second = resolve(&providers, &specs).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.require_str("host").unwrap(), "db.internal");
        assert_eq!(p.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_set_rejects_every_reference() {
        let specs = specs(vec![("api_key", VariableSpec::reference("environment", "KEY"))]);
        let err = resolve(&Providers::empty(), &specs).await.unwrap_err();
        assert!(matches!(err, ResolutionError::ProviderNotFound { .. }));
    }
}
