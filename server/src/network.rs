//! Server lifecycle: bind, spawn the acceptor and broadcast tasks, shut down.

use crate::acceptor::run_acceptor;
use crate::broadcast::run_broadcast;
use crate::registry::Registry;
use log::{error, info, warn};
use shared::PeerRecord;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Timing and capacity settings for a [`SyncServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Pause between ticks while clients are connected
    pub tick_interval: Duration,
    /// Pause between ticks while the registry is empty
    pub idle_interval: Duration,
    /// Limit on each handshake step
    pub handshake_timeout: Duration,
    /// How long a tick waits for one client's transform
    pub ingest_timeout: Duration,
    /// How long a tick waits to hand a frame to one client
    pub send_timeout: Duration,
    /// Silence after which a session is evicted
    pub peer_timeout: Duration,
    pub max_clients: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1),
            idle_interval: Duration::from_millis(100),
            handshake_timeout: Duration::from_millis(1000),
            ingest_timeout: Duration::from_millis(100),
            send_timeout: Duration::from_millis(250),
            peer_timeout: Duration::from_secs(5),
            max_clients: 64,
        }
    }
}

/// Stops a [`SyncServer`] from another task.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    signal: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.signal.send_replace(true);
    }
}

/// Authoritative sync server.
///
/// [`listen`](Self::listen) binds and starts accepting; [`deploy`](Self::deploy)
/// starts the broadcast loop; [`close`](Self::close) stops both tasks and
/// drops every connection.
pub struct SyncServer {
    local_addr: SocketAddr,
    registry: Arc<Registry>,
    config: ServerConfig,
    shutdown: Arc<watch::Sender<bool>>,
    acceptor: Option<JoinHandle<()>>,
    broadcaster: Option<JoinHandle<()>>,
}

impl SyncServer {
    pub async fn listen<A: ToSocketAddrs>(addr: A, config: ServerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let registry = Arc::new(Registry::new(config.max_clients));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let acceptor = tokio::spawn(run_acceptor(
            listener,
            Arc::clone(&registry),
            config.clone(),
            shutdown_rx,
        ));

        Ok(SyncServer {
            local_addr,
            registry,
            config,
            shutdown: Arc::new(shutdown),
            acceptor: Some(acceptor),
            broadcaster: None,
        })
    }

    /// Starts the broadcast loop. Calling it twice is a no-op.
    pub fn deploy(&mut self) {
        if !self.is_running() {
            error!("Server is not running");
            return;
        }
        if self.broadcaster.is_some() {
            warn!("Broadcast loop already deployed");
            return;
        }

        info!(
            "Broadcasting from {} every {:?}",
            self.local_addr, self.config.tick_interval
        );
        self.broadcaster = Some(tokio::spawn(run_broadcast(
            Arc::clone(&self.registry),
            self.config.clone(),
            self.shutdown.subscribe(),
        )));
    }

    pub fn is_running(&self) -> bool {
        self.acceptor.is_some() && !*self.shutdown.borrow()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the number of registered clients
    pub fn clients(&self) -> usize {
        self.registry.clients()
    }

    /// Wire view of every registered session, ordered by id.
    pub fn peers(&self) -> Vec<PeerRecord> {
        self.registry
            .snapshot()
            .iter()
            .map(|session| session.to_peer_record())
            .collect()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            signal: Arc::clone(&self.shutdown),
        }
    }

    /// Serves until a [`ShutdownHandle`] stops the server, then closes it.
    pub async fn wait(&mut self) {
        let mut signal = self.shutdown.subscribe();
        if signal.wait_for(|stop| *stop).await.is_err() {
            warn!("Shutdown signal dropped");
        }
        self.close().await;
    }

    /// Signals both tasks, waits for them and closes every session.
    pub async fn close(&mut self) {
        if self.acceptor.is_none() {
            return;
        }
        self.shutdown.send_replace(true);

        for handle in [self.acceptor.take(), self.broadcaster.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = handle.await {
                error!("Server task panicked: {}", e);
            }
        }

        let sessions = self.registry.clear();
        for session in &sessions {
            session.connection.close().await;
        }
        info!("Server closed, dropped {} sessions", sessions.len());
    }
}

impl Drop for SyncServer {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.tick_interval, Duration::from_millis(1));
        assert_eq!(config.idle_interval, Duration::from_millis(100));
        assert_eq!(config.handshake_timeout, Duration::from_millis(1000));
        assert!(config.ingest_timeout < config.peer_timeout);
        assert!(config.max_clients > 0);
    }

    #[tokio::test]
    async fn test_listen_deploy_close() {
        let mut server = SyncServer::listen("127.0.0.1:0", ServerConfig::default())
            .await
            .unwrap();
        assert!(server.is_running());
        assert_ne!(server.local_addr().port(), 0);
        assert_eq!(server.clients(), 0);

        server.deploy();
        server.deploy();

        server.close().await;
        assert!(!server.is_running());
        assert!(server.peers().is_empty());

        server.close().await;
    }

    #[tokio::test]
    async fn test_wait_returns_after_shutdown() {
        let mut server = SyncServer::listen("127.0.0.1:0", ServerConfig::default())
            .await
            .unwrap();
        server.deploy();

        let handle = server.shutdown_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.shutdown();
        });

        tokio::time::timeout(Duration::from_secs(2), server.wait())
            .await
            .unwrap();
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_deploy_after_close_is_refused() {
        let mut server = SyncServer::listen("127.0.0.1:0", ServerConfig::default())
            .await
            .unwrap();
        server.close().await;

        server.deploy();
        assert!(server.broadcaster.is_none());
    }
}
