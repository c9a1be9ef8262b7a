//! Listener socket binding.
//!
//! A listener binds either a TCP address or a local-domain socket path.
//! Local-domain sockets are handed to [`ShutdownHooks`] so their files are
//! removed when the proxy is asked to stop.

use super::shutdown::{ShutdownHooks, SocketPath};
use crate::config::ListenerConfig;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A bidirectional byte stream accepted from a client.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// An accepted client connection.
pub type Connection = Box<dyn AsyncStream>;

/// Where a listener binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindTarget {
    Address(String),
    Socket(PathBuf),
}

impl BindTarget {
    /// `address` wins when both are set; validation rejects that case
    /// before the proxy starts.
    pub fn from_config(config: &ListenerConfig) -> Option<Self> {
        match (&config.address, &config.socket) {
            (Some(address), _) if !address.is_empty() => Some(Self::Address(address.clone())),
            (_, Some(socket)) => Some(Self::Socket(socket.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for BindTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(address) => write!(f, "{address}"),
            Self::Socket(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Error, Debug)]
pub enum BindError {
    #[error("Listener '{0}' has neither an address nor a socket")]
    NoTarget(String),

    #[error("Unable to bind listener '{listener}' at {target}: {source}")]
    Io {
        listener: String,
        target: BindTarget,
        #[source]
        source: io::Error,
    },

    #[error("Unable to install signal handlers for listener '{listener}': {source}")]
    Signals {
        listener: String,
        #[source]
        source: io::Error,
    },
}

enum Inner {
    Tcp(TcpListener),
    Unix(UnixListener),
}

/// A bound, listening socket. Owned by exactly one listener task.
pub struct BoundSocket {
    inner: Inner,
    local_addr: String,
    shutdown: CancellationToken,
}

impl BoundSocket {
    pub fn from_tcp(listener: TcpListener) -> io::Result<Self> {
        let local_addr = listener.local_addr()?.to_string();
        Ok(Self {
            inner: Inner::Tcp(listener),
            local_addr,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn from_unix(listener: UnixListener, path: PathBuf, shutdown: CancellationToken) -> Self {
        Self {
            inner: Inner::Unix(listener),
            local_addr: path.display().to_string(),
            shutdown,
        }
    }

    /// Accept the next client. Returns the stream and a printable peer.
    pub async fn accept(&self) -> io::Result<(Connection, String)> {
        match &self.inner {
            Inner::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                let _ = stream.set_nodelay(true);
                Ok((Box::new(stream), peer.to_string()))
            }
            Inner::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok((Box::new(stream), "local".to_string()))
            }
        }
    }

    /// The bound address or socket path.
    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    /// Cancelled when the socket is being closed for shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_local(&self) -> bool {
        matches!(self.inner, Inner::Unix(_))
    }
}

impl fmt::Debug for BoundSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundSocket")
            .field("local_addr", &self.local_addr)
            .field("local", &self.is_local())
            .finish()
    }
}

/// Binds listener sockets and registers local-domain ones for teardown.
pub struct SocketManager {
    hooks: Arc<ShutdownHooks>,
}

impl SocketManager {
    pub fn new(hooks: Arc<ShutdownHooks>) -> Self {
        Self { hooks }
    }

    pub fn hooks(&self) -> &Arc<ShutdownHooks> {
        &self.hooks
    }

    /// Bind the socket described by `config`.
    pub async fn bind(&self, config: &ListenerConfig) -> Result<BoundSocket, BindError> {
        let target =
            BindTarget::from_config(config).ok_or_else(|| BindError::NoTarget(config.name.clone()))?;
        let io_error = |source| BindError::Io {
            listener: config.name.clone(),
            target: target.clone(),
            source,
        };

        let socket = match &target {
            BindTarget::Address(address) => {
                let listener = TcpListener::bind(address.as_str()).await.map_err(io_error)?;
                BoundSocket::from_tcp(listener).map_err(io_error)?
            }
            BindTarget::Socket(path) => {
                let listener = UnixListener::bind(path).map_err(io_error)?;
                let shutdown = CancellationToken::new();
                self.hooks
                    .register(
                        &config.name,
                        Arc::new(SocketPath::new(path.clone())),
                        shutdown.clone(),
                    )
                    .map_err(|source| BindError::Signals {
                        listener: config.name.clone(),
                        source,
                    })?;
                BoundSocket::from_unix(listener, path.clone(), shutdown)
            }
        };

        info!(
            "{} listener '{}' listening at: {}",
            config.protocol(),
            config.name,
            socket.local_addr()
        );
        Ok(socket)
    }
}
