//! Client connection handle and the background sync loop.
//!
//! [`SyncClient::connect`] publishes a registered link on a `watch` channel.
//! The sync task sleeps on that channel until a link exists, then trades
//! frames for transforms until the link fails, is replaced, or the task is
//! stopped. Stopping drops any in-flight read, so a silent server never
//! holds up shutdown.

use crate::error::{ConnectError, SyncError};
use crate::network::connect_stream;
use crate::replica::{ReplicaSet, SyncCollaborator};
use log::{debug, error, info, warn};
use shared::codec::{encode_transform, read_frame};
use shared::{SessionId, Transform};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Limit on connecting plus the whole handshake
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
        }
    }
}

/// A registered connection.
#[derive(Debug)]
struct Link {
    id: SessionId,
    stream: Mutex<TcpStream>,
}

type LinkSlot = Option<Arc<Link>>;

struct SyncTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct SyncClient {
    config: ClientConfig,
    link: Arc<watch::Sender<LinkSlot>>,
    sync: Option<SyncTask>,
}

impl Default for SyncClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl SyncClient {
    pub fn new(config: ClientConfig) -> Self {
        let (link, _) = watch::channel(None);
        Self {
            config,
            link: Arc::new(link),
            sync: None,
        }
    }

    /// Connects and registers, replacing any existing link.
    ///
    /// One attempt only; retry and backoff belong to the caller.
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        name: &str,
        transform: Transform,
    ) -> Result<SessionId, ConnectError> {
        let (stream, id) =
            connect_stream(host, port, name, transform, self.config.connect_timeout).await?;
        self.link.send_replace(Some(Arc::new(Link {
            id,
            stream: Mutex::new(stream),
        })));
        Ok(id)
    }

    /// [`connect`](Self::connect) using the collaborator's name and pose.
    pub async fn connect_as<C: SyncCollaborator>(
        &self,
        host: &str,
        port: u16,
        collaborator: &C,
    ) -> Result<SessionId, ConnectError> {
        let name = collaborator.local_name();
        self.connect(host, port, &name, collaborator.local_transform())
            .await
    }

    pub fn is_connected(&self) -> bool {
        self.link.borrow().is_some()
    }

    /// Id assigned by the server for the current link.
    pub fn local_id(&self) -> Option<SessionId> {
        self.link.borrow().as_ref().map(|link| link.id)
    }

    /// Spawns the sync loop driving `collaborator`. Ignored if already running.
    pub fn start_sync<C: SyncCollaborator>(&mut self, collaborator: C) {
        if self.sync.is_some() {
            warn!("Sync loop already running");
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_sync(
            collaborator,
            Arc::clone(&self.link),
            self.link.subscribe(),
            shutdown_rx,
        ));
        self.sync = Some(SyncTask { shutdown, handle });
    }

    pub fn is_syncing(&self) -> bool {
        self.sync.is_some()
    }

    /// Stops the sync loop and waits for it to exit.
    pub async fn stop_sync(&mut self) {
        let Some(task) = self.sync.take() else {
            return;
        };
        task.shutdown.send_replace(true);
        if let Err(e) = task.handle.await {
            error!("Sync task panicked: {}", e);
        }
    }

    /// Drops the current link. A running sync loop goes back to waiting.
    pub fn close(&self) {
        if self.link.send_replace(None).is_some() {
            info!("Disconnected from server");
        }
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        if let Some(task) = &self.sync {
            task.shutdown.send_replace(true);
        }
    }
}

async fn run_sync<C: SyncCollaborator>(
    mut collaborator: C,
    slot: Arc<watch::Sender<LinkSlot>>,
    mut links: watch::Receiver<LinkSlot>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut replicas = ReplicaSet::new();

    while !*shutdown.borrow() {
        let link = tokio::select! {
            _ = shutdown.changed() => break,
            link = links.wait_for(|slot| slot.is_some()) => match link {
                Ok(slot) => match slot.as_ref() {
                    Some(link) => Arc::clone(link),
                    None => continue,
                },
                Err(_) => break,
            },
        };
        debug!("Sync loop attached to session {}", link.id);

        let outcome = tokio::select! {
            _ = shutdown.changed() => None,
            _ = links.changed() => None,
            result = sync_link(&link, &mut replicas, &mut collaborator) => Some(result),
        };

        if let Some(Err(e)) = outcome {
            warn!("Lost connection to server: {}", e);
            slot.send_if_modified(|current| {
                let stale = matches!(current, Some(active) if Arc::ptr_eq(active, &link));
                if stale {
                    *current = None;
                }
                stale
            });
        }

        let dropped = replicas.clear(&mut collaborator);
        debug!("Sync loop detached from session {}, dropped {} peers", link.id, dropped);
    }
    debug!("Sync loop stopped");
}

/// Frame in, transform out, until the stream fails.
async fn sync_link<C: SyncCollaborator>(
    link: &Link,
    replicas: &mut ReplicaSet<C::Handle>,
    collaborator: &mut C,
) -> Result<(), SyncError> {
    let mut stream = link.stream.lock().await;
    loop {
        let records = read_frame(&mut *stream).await?;
        let report = replicas.apply(link.id, &records, collaborator);
        if report.created > 0 || report.removed > 0 {
            debug!(
                "Snapshot of {} records: {} new peers, {} gone",
                records.len(),
                report.created,
                report.removed
            );
        }

        let update = encode_transform(&collaborator.local_transform())?;
        stream.write_all(&update).await?;
    }
}
