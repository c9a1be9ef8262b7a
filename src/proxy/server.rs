use super::shutdown::ShutdownHooks;
use super::socket::{BindError, SocketManager};
use crate::config::Config;
use crate::listeners::{dispatch, DispatchError};
use crate::secrets::{load_provider, LoadError, Providers};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Fatal orchestrator failures. Each one stops the proxy before or while
/// listeners start.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// The proxy orchestrator.
pub struct Proxy {
    config: Config,
    sockets: SocketManager,
}

impl Proxy {
    /// A proxy whose local-domain sockets are torn down on SIGINT/SIGTERM.
    pub fn new(config: Config) -> Self {
        Self::with_hooks(config, ShutdownHooks::new())
    }

    pub fn with_hooks(config: Config, hooks: Arc<ShutdownHooks>) -> Self {
        Self {
            config,
            sockets: SocketManager::new(hooks),
        }
    }

    pub fn hooks(&self) -> &Arc<ShutdownHooks> {
        self.sockets.hooks()
    }

    /// Load every provider, in configuration order.
    pub async fn load_providers(&self) -> Result<Providers, ProxyError> {
        let mut providers = Vec::with_capacity(self.config.providers.len());
        for config in &self.config.providers {
            providers.push(load_provider(config).await?);
        }
        Ok(Providers::new(providers))
    }

    /// Start every listener and block until all of them exit.
    ///
    /// Providers are loaded before the first socket is bound. Listeners are
    /// bound and dispatched in configuration order; the first failure is
    /// returned and sockets bound before it are left to process exit.
    pub async fn run(self) -> Result<(), ProxyError> {
        let providers = Arc::new(self.load_providers().await?);
        let handlers = Arc::new(self.config.handlers.clone());

        let mut tasks = JoinSet::new();
        for config in &self.config.listeners {
            let socket = self.sockets.bind(config).await?;
            let listener = dispatch(
                socket,
                config.clone(),
                Arc::clone(&providers),
                Arc::clone(&handlers),
            )?;

            let name = listener.name().to_string();
            let protocol = listener.protocol();
            tasks.spawn(async move {
                listener.listen().await;
                (name, protocol)
            });
        }

        if tasks.is_empty() {
            info!("No listeners configured");
        }

        while let Some(exited) = tasks.join_next().await {
            match exited {
                Ok((name, protocol)) => info!("{} listener '{}' exited", protocol, name),
                Err(e) => error!("Listener task failed: {}", e),
            }
        }
        Ok(())
    }
}
