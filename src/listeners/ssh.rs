//! SSH listener: relays each session to the handler's backend `address`.
//!
//! Key material is not injected here; clients authenticate through the
//! `ssh-agent` listener by pointing `SSH_AUTH_SOCK` at its socket.

use super::{relay, ConnectionHandler, HandlerError, ListenerContext};
use crate::proxy::Connection;
use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

pub struct SshHandler {
    context: ListenerContext,
}

impl SshHandler {
    pub fn new(context: ListenerContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ConnectionHandler for SshHandler {
    async fn handle(&self, mut client: Connection, peer: &str) -> Result<(), HandlerError> {
        let handler = self.context.handler()?;
        let credentials = self.context.credentials(handler).await?;
        let address = credentials.require_str("address")?;

        let mut backend = TcpStream::connect(address)
            .await
            .map_err(|e| HandlerError::backend(format!("unable to connect to {address}: {e}")))?;
        debug!("ssh: relaying {} to {}", peer, address);
        relay(&mut client, &mut backend).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HandlerConfig, ListenerConfig, VariableSpec};
    use crate::secrets::Providers;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn context(address: Option<String>) -> ListenerContext {
        let mut credentials = HashMap::new();
        if let Some(address) = address {
            credentials.insert("address".to_string(), VariableSpec::literal(address));
        }
        ListenerContext {
            config: ListenerConfig {
                name: "ssh".into(),
                ..Default::default()
            },
            providers: Arc::new(Providers::empty()),
            handlers: Arc::new(vec![HandlerConfig {
                name: "ssh".into(),
                credentials,
                ..Default::default()
            }]),
        }
    }

    #[tokio::test]
    async fn relays_to_backend() {
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = backend.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut stream, _) = backend.accept().await.unwrap();
            stream.write_all(b"SSH-2.0-test\r\n").await.unwrap();
        });

        let handler = SshHandler::new(context(Some(address)));
        let (mut client, proxy) = duplex(1024);
        let task = tokio::spawn(async move { handler.handle(Box::new(proxy), "local").await });

        let mut banner = [0u8; 14];
        client.read_exact(&mut banner).await.unwrap();
        assert_eq!(&banner, b"SSH-2.0-test\r\n");
        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn missing_address_fails() {
        let handler = SshHandler::new(context(None));
        let (_client, proxy) = duplex(64);
        let err = handler.handle(Box::new(proxy), "local").await.unwrap_err();
        assert!(err.to_string().contains("address"));
    }
}
