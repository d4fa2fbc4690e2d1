//! Server state and TCP listener.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::accounts::PasswordStore;
use crate::config::ServerConfig;
use crate::connection;
use crate::forum::ForumStore;
use crate::registry::Hub;

/// Shared state accessible by all connection handlers.
pub struct ServerState {
    pub hub: Hub,
    pub accounts: PasswordStore,
    pub forum: ForumStore,
    /// When set, plain chat and most commands require a logged-in account.
    pub require_auth: bool,
}

pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    fn build_state(&self) -> Arc<ServerState> {
        Arc::new(ServerState {
            hub: Hub::new(),
            accounts: PasswordStore::new(&self.config.users_file),
            forum: ForumStore::new(&self.config.forum_file),
            require_auth: self.config.require_auth,
        })
    }

    /// Run the server, blocking forever.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        tracing::info!("Listening on {}", listener.local_addr()?);
        let state = self.build_state();

        loop {
            let (stream, _addr) = listener.accept().await?;
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                if let Err(e) = connection::handle(stream, state).await {
                    tracing::error!("Connection error: {e}");
                }
            });
        }
    }

    /// Start the server and return the bound address + task handle (for testing).
    pub async fn start(self) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        let addr = listener.local_addr()?;
        tracing::info!("Listening on {addr}");
        let state = self.build_state();

        let handle = tokio::spawn(async move {
            loop {
                let (stream, _addr) = listener.accept().await?;
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = connection::handle(stream, state).await {
                        tracing::error!("Connection error: {e}");
                    }
                });
            }
        });

        Ok((addr, handle))
    }
}
