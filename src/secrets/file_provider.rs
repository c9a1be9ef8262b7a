//! File secret provider.
//!
//! Resolves ids as filesystem paths and returns the file contents verbatim.
//! Relative ids are joined onto the optional `root` configuration field.

use super::error::ProviderError;
use super::types::Provider;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Resolves secrets from files on disk.
pub struct FileProvider {
    name: String,
    root: Option<PathBuf>,
}

impl FileProvider {
    pub fn new(name: impl Into<String>, root: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root,
        }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        let path = PathBuf::from(id);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        }
    }
}

#[async_trait]
impl Provider for FileProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn value(&self, id: &str) -> Result<Vec<u8>, ProviderError> {
        let path = self.path_for(id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ProviderError::not_found(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
