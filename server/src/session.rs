//! Per-client session state held by the registry.
//!
//! A [`ClientSessionRecord`] is cheap to clone: the socket lives behind an
//! `Arc` in [`Connection`], so registry snapshots copy ids, names and
//! transforms while every copy still talks to the same stream.

use log::debug;
use shared::codec::decode_transform;
use shared::{CodecError, PeerRecord, SessionId, Transform, TRANSFORM_LEN};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{self, Duration};

/// A registered peer as the server sees it.
#[derive(Debug, Clone)]
pub struct ClientSessionRecord<C = Connection> {
    /// Unique id assigned at registration
    pub id: SessionId,
    /// Display name, already cut to the wire limit
    pub name: String,
    /// Last transform reported by the client
    pub transform: Transform,
    pub connection: C,
    /// Registration time or time of the last ingested transform
    pub last_heard: Instant,
}

impl<C> ClientSessionRecord<C> {
    pub fn new(id: SessionId, name: String, transform: Transform, connection: C) -> Self {
        Self {
            id,
            name,
            transform,
            connection,
            last_heard: Instant::now(),
        }
    }

    /// Wire view of this session for snapshot frames.
    pub fn to_peer_record(&self) -> PeerRecord {
        PeerRecord::new(self.id, self.name.clone(), self.transform)
    }

    /// Checks if the client has gone quiet for longer than `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_heard.elapsed() > timeout
    }
}

#[derive(Debug)]
struct Link {
    stream: TcpStream,
    /// Transform bytes received but not yet consumed
    pending: Vec<u8>,
    /// Set once the peer hung up or a write failed
    closed: bool,
}

/// Shared handle to a client's socket.
///
/// Only one task touches a given stream at a time; the async mutex orders the
/// registration ack before any snapshot frame.
#[derive(Debug, Clone)]
pub struct Connection {
    peer_addr: SocketAddr,
    link: Arc<Mutex<Link>>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> std::io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;

        Ok(Self {
            peer_addr,
            link: Arc::new(Mutex::new(Link {
                stream,
                pending: Vec::with_capacity(TRANSFORM_LEN * 4),
                closed: false,
            })),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub async fn is_closed(&self) -> bool {
        self.link.lock().await.closed
    }

    /// Holds the stream while `register` runs, then writes whatever ack it
    /// returns. Nothing else can write to the stream in between.
    pub async fn confirm<F, A>(&self, register: F) -> std::io::Result<Option<A>>
    where
        F: FnOnce() -> Option<(A, Vec<u8>)>,
    {
        let mut link = self.link.lock().await;
        let Some((value, ack)) = register() else {
            return Ok(None);
        };
        link.stream.write_all(&ack).await?;
        Ok(Some(value))
    }

    /// Writes a whole frame, giving up after `wait`.
    ///
    /// A timed-out or failed write leaves the stream in an unknown state, so
    /// the connection is marked closed.
    pub async fn send(&self, frame: &[u8], wait: Duration) -> std::io::Result<()> {
        let mut link = self.link.lock().await;
        if link.closed {
            return Err(std::io::ErrorKind::NotConnected.into());
        }

        let result = match time::timeout(wait, link.stream.write_all(frame)).await {
            Ok(result) => result,
            Err(_) => Err(std::io::ErrorKind::TimedOut.into()),
        };
        if result.is_err() {
            link.closed = true;
        }
        result
    }

    /// Waits up to `wait` for a complete transform record.
    ///
    /// Returns `Ok(None)` when nothing complete arrived in time or the peer
    /// has hung up. Partial bytes are kept for the next call. When several
    /// records are queued the newest wins.
    pub async fn poll_transform(&self, wait: Duration) -> Result<Option<Transform>, CodecError> {
        let mut guard = self.link.lock().await;
        let link = &mut *guard;
        if link.closed {
            return Ok(None);
        }

        let deadline = time::Instant::now() + wait;
        let mut chunk = [0u8; TRANSFORM_LEN * 4];
        while link.pending.len() < TRANSFORM_LEN {
            match time::timeout_at(deadline, link.stream.read(&mut chunk)).await {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => {
                    debug!("Peer {} closed its stream", self.peer_addr);
                    link.closed = true;
                    return Ok(None);
                }
                Ok(Ok(n)) => link.pending.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => {
                    link.closed = true;
                    return Err(e.into());
                }
            }
        }

        let complete = link.pending.len() / TRANSFORM_LEN * TRANSFORM_LEN;
        let transform = decode_transform(&link.pending[complete - TRANSFORM_LEN..complete])?;
        link.pending.drain(..complete);
        Ok(Some(transform))
    }

    /// Shuts the write side down and stops servicing this connection.
    pub async fn close(&self) {
        let mut link = self.link.lock().await;
        link.closed = true;
        if let Err(e) = link.stream.shutdown().await {
            debug!("Error closing connection to {}: {}", self.peer_addr, e);
        }
    }
}
