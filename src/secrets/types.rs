//! Core types for the secret provider system.

use super::error::ProviderError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Provider Trait
// ============================================================================

/// A named source of secret values, queried by path.
///
/// A single instance is shared by every listener task, so `value` may be
/// called concurrently from many connections at once. Implementations keep
/// any mutable state (token caches and the like) behind their own locks.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The identity references use to select this provider.
    fn name(&self) -> &str;

    /// Retrieve the secret stored at `id`.
    async fn value(&self, id: &str) -> Result<Vec<u8>, ProviderError>;
}

// ============================================================================
// Provider Set
// ============================================================================

/// The ordered, immutable set of live providers.
///
/// Built once before any listener binds and shared behind an `Arc` afterwards.
#[derive(Clone, Default)]
pub struct Providers {
    providers: Vec<Arc<dyn Provider>>,
}

impl Providers {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self { providers }
    }

    /// The set used while bootstrapping providers: nothing to reference.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Find the provider whose identity is `name`.
    pub fn find(&self, name: &str) -> Option<&Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.providers.iter()
    }

}

impl fmt::Debug for Providers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|p| p.name()))
            .finish()
    }
}

// ============================================================================
// Resolved Variables
// ============================================================================

/// Literal values produced by resolving a variable spec map.
///
/// `Debug` prints field names only.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Variables {
    values: HashMap<String, Vec<u8>>,
}

impl Variables {
    pub fn new(values: HashMap<String, Vec<u8>>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.values.get(name).map(Vec::as_slice)
    }

    /// Fetch a field as text, failing if it is absent or not UTF-8.
    pub fn require_str(&self, name: &str) -> Result<&str, super::ResolutionError> {
        let bytes = self
            .get(name)
            .ok_or_else(|| super::ResolutionError::Missing(name.to_string()))?;
        std::str::from_utf8(bytes).map_err(|_| super::ResolutionError::NotUtf8(name.to_string()))
    }

    /// Like [`Variables::require_str`], but absence is not an error.
    pub fn optional_str(&self, name: &str) -> Result<Option<&str>, super::ResolutionError> {
        match self.get(name) {
            Some(_) => self.require_str(name).map(Some),
            None => Ok(None),
        }
    }

}

impl fmt::Debug for Variables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.values.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Variables").field("names", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl Provider for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn value(&self, id: &str) -> Result<Vec<u8>, ProviderError> {
            Err(ProviderError::not_found(id))
        }
    }

    #[test]
    fn find_by_identity() {
        let providers = Providers::new(vec![
            Arc::new(Named("p")) as Arc<dyn Provider>,
            Arc::new(Named("q")),
        ]);
        assert_eq!(providers.find("q").map(|p| p.name()), Some("q"));
        assert!(providers.find("r").is_none());
        assert_eq!(providers.iter().count(), 2);
    }

    #[test]
    fn debug_lists_names() {
        let providers = Providers::new(vec![Arc::new(Named("conjur")) as Arc<dyn Provider>]);
        assert_eq!(format!("{providers:?}"), r#"["conjur"]"#);
    }

    #[test]
    fn variables_debug_hides_values() {
        let mut values = HashMap::new();
        values.insert("password".to_string(), b"hunter2".to_vec());
        let vars = Variables::new(values);
        let printed = format!("{vars:?}");
        assert!(printed.contains("password"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn require_str_errors() {
        let mut values = HashMap::new();
        values.insert("bin".to_string(), vec![0xff, 0xfe]);
        let vars = Variables::new(values);
        assert!(matches!(
            vars.require_str("bin"),
            Err(crate::secrets::ResolutionError::NotUtf8(_))
        ));
        assert!(matches!(
            vars.require_str("nope"),
            Err(crate::secrets::ResolutionError::Missing(_))
        ));
        assert_eq!(vars.optional_str("nope").unwrap(), None);
    }
}
