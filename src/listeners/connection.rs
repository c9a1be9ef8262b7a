//! The accept loop shared by every protocol.

use super::{HandlerError, Listener, ListenerProtocol};
use crate::config::ACCEPT_ERROR_BACKOFF_MS;
use crate::proxy::{BoundSocket, Connection};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Services one accepted client connection.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    async fn handle(&self, client: Connection, peer: &str) -> Result<(), HandlerError>;
}

/// Accepts connections on a bound socket and runs each through `H` in its
/// own task.
pub struct ProtocolListener<H> {
    name: String,
    protocol: ListenerProtocol,
    socket: BoundSocket,
    handler: Arc<H>,
}

impl<H: ConnectionHandler> ProtocolListener<H> {
    pub fn new(
        name: impl Into<String>,
        protocol: ListenerProtocol,
        socket: BoundSocket,
        handler: H,
    ) -> Self {
        Self {
            name: name.into(),
            protocol,
            socket,
            handler: Arc::new(handler),
        }
    }
}

#[async_trait]
impl<H: ConnectionHandler> Listener for ProtocolListener<H> {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> ListenerProtocol {
        self.protocol
    }

    async fn listen(self: Box<Self>) {
        let shutdown = self.socket.shutdown_token();

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.socket.accept() => accepted,
            };

            let (client, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("{} listener '{}': accept failed: {}", self.protocol, self.name, e);
                    tokio::time::sleep(Duration::from_millis(ACCEPT_ERROR_BACKOFF_MS)).await;
                    continue;
                }
            };

            debug!("{} listener '{}': connection from {}", self.protocol, self.name, peer);
            let handler = Arc::clone(&self.handler);
            let name = self.name.clone();
            let protocol = self.protocol;
            tokio::spawn(async move {
                match handler.handle(client, &peer).await {
                    Ok(()) => debug!("{} listener '{}': {} disconnected", protocol, name, peer),
                    Err(e) => warn!(
                        "{} listener '{}': connection from {} failed: {}",
                        protocol, name, peer, e
                    ),
                }
            });
        }

        info!("{} listener '{}' stopped", self.protocol, self.name);
    }
}

/// Copy bytes both ways until either side closes.
pub async fn relay<A, B>(client: &mut A, backend: &mut B) -> Result<(), HandlerError>
where
    A: AsyncRead + AsyncWrite + Unpin + ?Sized,
    B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    match tokio::io::copy_bidirectional(client, backend).await {
        Ok((up, down)) => {
            debug!("Relay closed after {} bytes up, {} bytes down", up, down);
            Ok(())
        }
        Err(e) if is_disconnect(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn is_disconnect(e: &std::io::Error) -> bool {
    use std::io::ErrorKind::*;
    matches!(e.kind(), ConnectionReset | BrokenPipe | UnexpectedEof)
}
