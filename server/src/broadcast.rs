//! Per-tick snapshot fan-out and transform ingestion.

use crate::network::ServerConfig;
use crate::registry::{Registry, TransformUpdate};
use log::{debug, error, info, trace};
use shared::codec::encode_frame;
use shared::PeerRecord;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{self, Duration};

/// What one tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Sessions in the snapshot
    pub sessions: usize,
    /// Sessions the frame was written to
    pub delivered: usize,
    /// Sessions whose transform was updated
    pub updated: usize,
    /// Sessions removed for inactivity
    pub evicted: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.sessions == 0
    }
}

/// Runs a single broadcast tick.
///
/// 1. Copy the registry.
/// 2. Encode every session into one frame and write it to each of them.
/// 3. Read at most one transform from each session.
/// 4. Apply all transforms read in one locked batch.
/// 5. Evict and close sessions that stayed silent past `peer_timeout`.
///
/// A failure on one connection never stops the others; a session with
/// nothing to read is skipped for this tick.
pub async fn broadcast_tick(registry: &Registry, config: &ServerConfig) -> TickReport {
    let sessions = registry.snapshot();
    if sessions.is_empty() {
        return TickReport::default();
    }

    let records: Vec<PeerRecord> = sessions.iter().map(|s| s.to_peer_record()).collect();
    let frame = match encode_frame(&records) {
        Ok(frame) => frame,
        Err(e) => {
            error!("Failed to encode snapshot frame: {}", e);
            return TickReport {
                sessions: sessions.len(),
                ..TickReport::default()
            };
        }
    };

    let mut delivered = 0;
    for session in &sessions {
        match session.connection.send(&frame, config.send_timeout).await {
            Ok(()) => delivered += 1,
            Err(e) => trace!("Failed to send snapshot to client {}: {}", session.id, e),
        }
    }

    let mut updates = Vec::with_capacity(sessions.len());
    for session in &sessions {
        match session
            .connection
            .poll_transform(config.ingest_timeout)
            .await
        {
            Ok(Some(transform)) => updates.push(TransformUpdate {
                id: session.id,
                transform,
            }),
            Ok(None) => {}
            Err(e) => debug!("Failed to read transform from client {}: {}", session.id, e),
        }
    }
    let updated = registry.apply_updates(&updates);

    let evicted = registry.evict_stale(config.peer_timeout);
    for session in &evicted {
        session.connection.close().await;
    }

    TickReport {
        sessions: sessions.len(),
        delivered,
        updated,
        evicted: evicted.len(),
    }
}

/// Broadcast loop. Ticks every `tick_interval` while sessions exist and
/// backs off to `idle_interval` when the registry is empty.
pub async fn run_broadcast(
    registry: Arc<Registry>,
    config: ServerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticks: u64 = 0;

    while !*shutdown.borrow() {
        let report = tokio::select! {
            _ = shutdown.changed() => break,
            report = broadcast_tick(&registry, &config) => report,
        };

        ticks += 1;
        if !report.is_idle() && ticks % 1000 == 0 {
            debug!(
                "Tick {}: {} sessions, {} delivered, {} updated",
                ticks, report.sessions, report.delivered, report.updated
            );
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = time::sleep(pause_after(&report, &config)) => {}
        }
    }
    info!("Broadcast loop stopped after {} ticks", ticks);
}

/// Interval the loop sleeps after a tick with the given report.
pub fn pause_after(report: &TickReport, config: &ServerConfig) -> Duration {
    if report.is_idle() {
        config.idle_interval
    } else {
        config.tick_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Connection;
    use shared::codec::{encode_transform, read_frame};
    use shared::Transform;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};

    fn test_config() -> ServerConfig {
        ServerConfig {
            ingest_timeout: Duration::from_millis(100),
            ..ServerConfig::default()
        }
    }

    async fn register(registry: &Registry, name: &str, transform: Transform) -> TcpStream {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        registry
            .insert(name.into(), transform, Connection::new(server_side).unwrap())
            .unwrap();
        client
    }

    #[test]
    fn test_pause_backs_off_when_idle() {
        let config = ServerConfig::default();
        assert_eq!(pause_after(&TickReport::default(), &config), config.idle_interval);

        let busy = TickReport {
            sessions: 1,
            ..TickReport::default()
        };
        assert_eq!(pause_after(&busy, &config), config.tick_interval);
    }

    #[tokio::test]
    async fn test_empty_registry_tick_is_idle() {
        let registry = Registry::new(4);
        let report = broadcast_tick(&registry, &test_config()).await;
        assert!(report.is_idle());
        assert_eq!(report, TickReport::default());
    }

    #[tokio::test]
    async fn test_tick_broadcasts_all_sessions() {
        let registry = Registry::new(4);
        let mut ann = register(&registry, "Ann", Transform::new(1.0, 2.0, 0.0)).await;
        let mut bob = register(&registry, "Bob", Transform::new(3.0, 4.0, 90.0)).await;

        let report = broadcast_tick(&registry, &test_config()).await;
        assert_eq!(report.sessions, 2);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.updated, 0);

        for stream in [&mut ann, &mut bob] {
            let records = read_frame(stream).await.unwrap();
            assert_eq!(records.len(), 2);
            assert_eq!(records[0].id, 1);
            assert_eq!(records[0].name, "Ann");
            assert_eq!(records[1].id, 2);
            assert_eq!(records[1].transform, Transform::new(3.0, 4.0, 90.0));
        }
    }

    #[tokio::test]
    async fn test_tick_ingests_transforms() {
        let registry = Registry::new(4);
        let mut ann = register(&registry, "Ann", Transform::default()).await;
        let _bob = register(&registry, "Bob", Transform::new(7.0, 7.0, 7.0)).await;

        ann.write_all(&encode_transform(&Transform::new(5.0, 6.0, 45.0)).unwrap())
            .await
            .unwrap();

        let report = broadcast_tick(&registry, &test_config()).await;
        assert_eq!(report.updated, 1);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].transform, Transform::new(5.0, 6.0, 45.0));
        assert_eq!(snapshot[1].transform, Transform::new(7.0, 7.0, 7.0));
    }

    #[tokio::test]
    async fn test_closed_peer_skipped_not_removed() {
        let registry = Registry::new(4);
        let ann = register(&registry, "Ann", Transform::new(1.0, 1.0, 1.0)).await;
        drop(ann);

        let report = broadcast_tick(&registry, &test_config()).await;
        assert_eq!(report.updated, 0);
        assert_eq!(report.evicted, 0);
        assert_eq!(registry.clients(), 1);
        assert_eq!(registry.snapshot()[0].transform, Transform::new(1.0, 1.0, 1.0));
    }

    #[tokio::test]
    async fn test_silent_peer_evicted_after_timeout() {
        let registry = Registry::new(4);
        let _ann = register(&registry, "Ann", Transform::default()).await;

        let config = ServerConfig {
            ingest_timeout: Duration::from_millis(10),
            peer_timeout: Duration::from_millis(50),
            ..ServerConfig::default()
        };

        let report = broadcast_tick(&registry, &config).await;
        assert_eq!(report.evicted, 0);

        time::sleep(Duration::from_millis(80)).await;
        let report = broadcast_tick(&registry, &config).await;
        assert_eq!(report.evicted, 1);
        assert!(registry.is_empty());
    }
}
