//! Error types for secret providers and variable resolution.

use thiserror::Error;

/// Errors raised by a provider while constructing itself or retrieving a value.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The requested secret does not exist in the backend.
    #[error("Secret not found: {id}")]
    NotFound { id: String },

    /// The backend rejected the provider's identity.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// A required configuration or credential field is missing or malformed.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The backend answered with something other than a value.
    #[error("Backend error: {message}")]
    Backend { message: String },

    /// HTTP transport failure talking to a remote backend.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error reading a local backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Failure to turn a variable spec map into literal values.
#[derive(Error, Debug)]
pub enum ResolutionError {
    /// The spec references a provider that is not in the available set.
    #[error("Variable '{variable}' references provider '{provider}', which is not available")]
    ProviderNotFound { variable: String, provider: String },

    /// The provider was found but could not produce the value.
    #[error("Variable '{variable}' could not be retrieved from provider '{provider}' at '{id}': {source}")]
    Retrieval {
        variable: String,
        provider: String,
        id: String,
        #[source]
        source: ProviderError,
    },

    /// A consumer asked for a field the spec map did not contain.
    #[error("Required variable '{0}' is not configured")]
    Missing(String),

    /// A consumer needed a textual value and the secret is not UTF-8.
    #[error("Variable '{0}' is not valid UTF-8")]
    NotUtf8(String),
}

/// An identifier that does not name any member of a closed set of variants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported {kind} '{value}' (expected one of: {})", .expected.join(", "))]
pub struct UnsupportedVariant {
    pub kind: &'static str,
    pub value: String,
    pub expected: &'static [&'static str],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_display() {
        let err = ProviderError::not_found("db/password");
        assert_eq!(err.to_string(), "Secret not found: db/password");

        let err = ProviderError::authentication_failed("401 Unauthorized");
        assert!(err.to_string().contains("401"));
    }

    #[test]
    fn resolution_error_names_missing_provider() {
        let err = ResolutionError::ProviderNotFound {
            variable: "password".into(),
            provider: "q".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'q'"));
        assert!(msg.contains("password"));
    }

    #[test]
    fn unsupported_variant_lists_expected() {
        let err = UnsupportedVariant {
            kind: "protocol",
            value: "carrierpigeon".into(),
            expected: &["pg", "http"],
        };
        assert_eq!(
            err.to_string(),
            "unsupported protocol 'carrierpigeon' (expected one of: pg, http)"
        );
    }
}
