//! Protocol listeners and the dispatcher that builds them.
//!
//! Every listener is a [`ProtocolListener`] accept loop paired with a
//! protocol-specific [`ConnectionHandler`]. The dispatcher picks the handler
//! from the listener's protocol identifier.

pub mod connection;
pub mod http;
pub mod pg;
pub mod ssh;
pub mod ssh_agent;

pub use connection::{relay, ConnectionHandler, ProtocolListener};

use crate::config::{handlers_for, HandlerConfig, ListenerConfig};
use crate::proxy::BoundSocket;
use crate::secrets::{resolve, Providers, ResolutionError, UnsupportedVariant, Variables};
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// A running protocol endpoint.
#[async_trait]
pub trait Listener: Send {
    /// The configured listener name.
    fn name(&self) -> &str;

    fn protocol(&self) -> ListenerProtocol;

    /// Accept and service connections until the socket is shut down.
    async fn listen(self: Box<Self>);
}

/// The closed set of listener protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerProtocol {
    Pg,
    Http,
    Ssh,
    SshAgent,
}

impl ListenerProtocol {
    pub const ALL: &'static [&'static str] = &["pg", "http", "ssh", "ssh-agent"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pg => "pg",
            Self::Http => "http",
            Self::Ssh => "ssh",
            Self::SshAgent => "ssh-agent",
        }
    }
}

impl FromStr for ListenerProtocol {
    type Err = UnsupportedVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pg" => Ok(Self::Pg),
            "http" => Ok(Self::Http),
            "ssh" => Ok(Self::Ssh),
            "ssh-agent" => Ok(Self::SshAgent),
            _ => Err(UnsupportedVariant {
                kind: "protocol",
                value: s.to_string(),
                expected: Self::ALL,
            }),
        }
    }
}

impl fmt::Display for ListenerProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a bound socket could not be turned into a listener.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Unrecognized protocol '{protocol}' on listener '{listener}'")]
    UnsupportedProtocol {
        listener: String,
        protocol: String,
        #[source]
        source: UnsupportedVariant,
    },

    #[error("Handler '{handler}' on listener '{listener}' is invalid: {message}")]
    InvalidHandler {
        listener: String,
        handler: String,
        message: String,
    },
}

/// A failure servicing one client connection. Never fatal to the listener.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("no handler is configured for listener '{0}'")]
    NoHandler(String),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("invalid credential '{name}': {message}")]
    InvalidCredential { name: String, message: String },
}

impl HandlerError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    pub fn invalid_credential(name: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::InvalidCredential {
            name: name.into(),
            message: message.to_string(),
        }
    }
}

/// What every concrete handler receives from the dispatcher.
#[derive(Clone)]
pub struct ListenerContext {
    pub config: ListenerConfig,
    pub providers: Arc<Providers>,
    pub handlers: Arc<Vec<HandlerConfig>>,
}

impl ListenerContext {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Handlers attached to this listener, in configuration order.
    pub fn handlers(&self) -> impl Iterator<Item = &HandlerConfig> {
        handlers_for(&self.handlers, &self.config.name)
    }

    /// The first handler attached to this listener.
    pub fn handler(&self) -> Result<&HandlerConfig, HandlerError> {
        self.handlers()
            .next()
            .ok_or_else(|| HandlerError::NoHandler(self.config.name.clone()))
    }

    /// Resolve a handler's credentials against the full provider set.
    pub async fn credentials(&self, handler: &HandlerConfig) -> Result<Variables, HandlerError> {
        Ok(resolve(&self.providers, &handler.credentials).await?)
    }
}

/// Build the listener for `socket` from its configured protocol.
pub fn dispatch(
    socket: BoundSocket,
    config: ListenerConfig,
    providers: Arc<Providers>,
    handlers: Arc<Vec<HandlerConfig>>,
) -> Result<Box<dyn Listener>, DispatchError> {
    let protocol = ListenerProtocol::from_str(config.protocol()).map_err(|source| {
        DispatchError::UnsupportedProtocol {
            listener: config.name.clone(),
            protocol: config.protocol().to_string(),
            source,
        }
    })?;

    let name = config.name.clone();
    let context = ListenerContext {
        config,
        providers,
        handlers,
    };

    let listener: Box<dyn Listener> = match protocol {
        ListenerProtocol::Pg => Box::new(ProtocolListener::new(
            name,
            protocol,
            socket,
            pg::PgHandler::new(context),
        )),
        ListenerProtocol::Http => Box::new(ProtocolListener::new(
            name,
            protocol,
            socket,
            http::HttpHandler::new(context)?,
        )),
        ListenerProtocol::Ssh => Box::new(ProtocolListener::new(
            name,
            protocol,
            socket,
            ssh::SshHandler::new(context),
        )),
        ListenerProtocol::SshAgent => Box::new(ProtocolListener::new(
            name,
            protocol,
            socket,
            ssh_agent::SshAgentHandler::new(context),
        )),
    };
    Ok(listener)
}
