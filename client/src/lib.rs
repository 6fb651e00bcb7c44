//! # Sync Client Library
//!
//! Client side of the peer transform synchronization protocol. A host
//! application (renderer, game loop, headless bot) connects once, then lets a
//! background task keep its view of every remote peer current while it
//! reports its own pose back to the server each tick.
//!
//! ## Architecture Overview
//!
//! ### Connect
//! [`SyncClient::connect`] runs the handshake (tag, ack, JSON registration,
//! id) and stores the resulting link. A failed attempt is returned to the
//! caller as a [`ConnectError`]; the library never retries on its own.
//!
//! ### Sync Loop
//! [`SyncClient::start_sync`] spawns a task that waits for a link, reads one
//! snapshot frame, updates the local replicas and answers with the local
//! transform, over and over. It never spins while disconnected and can be
//! stopped even while blocked on a silent server.
//!
//! ### Replicas
//! Remote peers are tracked in a [`ReplicaSet`] keyed by session id. The host
//! sees them only through its [`SyncCollaborator`] hooks: a peer is created
//! the first time it appears, updated on every frame after that, and
//! released when it drops out of the server's snapshot.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::{SyncClient, SyncCollaborator};
//! use shared::{SessionId, Transform};
//!
//! struct Bot;
//!
//! impl SyncCollaborator for Bot {
//!     type Handle = String;
//!
//!     fn local_transform(&self) -> Transform {
//!         Transform::new(0.0, 0.0, 0.0)
//!     }
//!
//!     fn local_name(&self) -> String {
//!         "bot".into()
//!     }
//!
//!     fn on_peer_seen(&mut self, _id: SessionId, name: &str, _t: Transform) -> String {
//!         name.to_string()
//!     }
//!
//!     fn on_peer_updated(&mut self, _handle: &mut String, _t: Transform) {}
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = SyncClient::default();
//!     client.connect_as("127.0.0.1", 8888, &Bot).await?;
//!     client.start_sync(Bot);
//!
//!     tokio::signal::ctrl_c().await?;
//!     client.stop_sync().await;
//!     client.close();
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod network;
pub mod replica;
pub mod sync;

pub use error::{ConnectError, SyncError};
pub use replica::{ApplyReport, PeerReplica, ReplicaSet, SyncCollaborator};
pub use sync::{ClientConfig, SyncClient};
