//! # Sync Server Library
//!
//! Authoritative side of the peer transform synchronization protocol. The
//! server keeps the registry of connected peers (id, name, 2D transform),
//! broadcasts a snapshot of all of them every tick and ingests each peer's
//! latest transform in return.
//!
//! ## Core Responsibilities
//!
//! ### Handshake
//! Every new TCP connection must send the protocol tag, receive a one-byte
//! ack, send a JSON registration and receive its assigned id. Anything else
//! gets the connection closed with no explanation. Connections are handled
//! one at a time so the id sequence follows accept order.
//!
//! ### Registry
//! A single lock guards the id → session map. Its API only copies out,
//! inserts or batch-applies, which keeps socket I/O outside the critical
//! section by construction.
//!
//! ### Broadcast
//! Each tick copies the registry, writes the same frame to every session,
//! reads back at most one transform per session and applies the batch.
//! Sessions silent for longer than the peer timeout are evicted.
//!
//! ## Module Organization
//!
//! - `session`: per-client record and the socket handle it owns
//! - `registry`: the locked session map
//! - `acceptor`: accept loop and handshake state machine
//! - `broadcast`: tick loop
//! - `network`: [`SyncServer`] lifecycle and [`ServerConfig`]
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{ServerConfig, SyncServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = SyncServer::listen("0.0.0.0:8888", ServerConfig::default()).await?;
//!     server.deploy();
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.close().await;
//!     Ok(())
//! }
//! ```

pub mod acceptor;
pub mod broadcast;
pub mod error;
pub mod network;
pub mod registry;
pub mod session;

pub use error::HandshakeError;
pub use network::{ServerConfig, ShutdownHandle, SyncServer};
pub use registry::{Registry, TransformUpdate};
pub use session::{ClientSessionRecord, Connection};
