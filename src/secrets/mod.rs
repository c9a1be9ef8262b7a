//! Secret providers and variable resolution.
//!
//! A [`Provider`] answers `value(id)` for one secret backend. The loader
//! builds providers from configuration; the resolver turns maps of
//! literal-or-reference specs into literal values using a set of providers.

pub mod conjur;
pub mod env_provider;
pub mod error;
pub mod file_provider;
pub mod loader;
pub mod resolver;
pub mod types;

pub use error::{ProviderError, ResolutionError, UnsupportedVariant};
pub use loader::{load_provider, LoadError, ProviderType};
pub use resolver::{resolve, resolve_one};
pub use types::{Provider, Providers, Variables};
