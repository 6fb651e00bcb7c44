//! Accepts connections and walks each through the handshake.
//!
//! Connections are handled one at a time: await the tag, ack it, await the
//! JSON registration, register, confirm with the assigned id. Any failure
//! closes the connection without a word to the peer and the acceptor moves
//! on to the next one.

use crate::error::HandshakeError;
use crate::network::ServerConfig;
use crate::registry::Registry;
use crate::session::Connection;
use log::{debug, info, warn};
use shared::codec::{
    decode_registration, encode_registration_ack, is_handshake_tag, truncate_name,
};
use shared::{CodecError, Registration, SessionId, ACK_SUCCESS, HANDSHAKE_TAG};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::{self, Duration, Instant};

/// Largest registration payload accepted.
pub const REGISTRATION_BUFFER_LEN: usize = 1024;

/// Bound on the read that carries the handshake tag.
pub const TAG_BUFFER_LEN: usize = 128;

/// Reads until at least the handshake tag has arrived, failing on the first
/// byte that diverges from it. Anything read past the tag is discarded.
pub async fn await_tag<S>(stream: &mut S, wait: Duration) -> Result<(), HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let deadline = Instant::now() + wait;
    let mut buf = [0u8; TAG_BUFFER_LEN];
    let mut filled = 0;

    while filled < HANDSHAKE_TAG.len() {
        let n = time::timeout_at(deadline, stream.read(&mut buf[filled..]))
            .await
            .map_err(|_| HandshakeError::Timeout(wait, "handshake tag"))??;
        if n == 0 {
            return Err(HandshakeError::Closed);
        }
        filled += n;

        let seen = filled.min(HANDSHAKE_TAG.len());
        if buf[..seen] != HANDSHAKE_TAG[..seen] {
            return Err(HandshakeError::BadTag);
        }
    }

    if !is_handshake_tag(&buf[..filled]) {
        return Err(HandshakeError::BadTag);
    }
    if filled > HANDSHAKE_TAG.len() {
        debug!("Discarded {} bytes after handshake tag", filled - HANDSHAKE_TAG.len());
    }
    Ok(())
}

/// Reads the JSON registration, accumulating reads until it parses.
pub async fn await_registration<S>(
    stream: &mut S,
    wait: Duration,
) -> Result<Registration, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let deadline = Instant::now() + wait;
    let mut buf = vec![0u8; REGISTRATION_BUFFER_LEN];
    let mut filled = 0;

    loop {
        let n = time::timeout_at(deadline, stream.read(&mut buf[filled..]))
            .await
            .map_err(|_| HandshakeError::Timeout(wait, "registration"))??;
        if n == 0 {
            return Err(HandshakeError::Closed);
        }
        filled += n;

        match decode_registration(&buf[..filled]) {
            Ok(registration) => return Ok(registration),
            Err(CodecError::Registration(e)) if e.is_eof() => {
                if filled == buf.len() {
                    return Err(HandshakeError::Oversized(REGISTRATION_BUFFER_LEN));
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Runs the tag/ack/registration exchange on a fresh connection.
pub async fn handshake<S>(stream: &mut S, wait: Duration) -> Result<Registration, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    await_tag(stream, wait).await?;
    stream.write_all(&[ACK_SUCCESS]).await?;
    await_registration(stream, wait).await
}

/// Handshakes, registers and confirms one connection.
async fn admit(
    mut stream: TcpStream,
    registry: &Registry,
    config: &ServerConfig,
) -> Result<SessionId, HandshakeError> {
    let registration = handshake(&mut stream, config.handshake_timeout).await?;
    let name = truncate_name(&registration.name).to_string();
    let transform = registration.transform();

    let connection = Connection::new(stream)?;
    let handle = connection.clone();
    let confirmed = handle
        .confirm(|| {
            let id = registry.insert(name, transform, connection)?;
            Some((id, encode_registration_ack(id).to_vec()))
        })
        .await?;

    confirmed.ok_or(HandshakeError::ServerFull)
}

/// Accept loop. Runs until `shutdown` flips to true or its sender is dropped.
pub async fn run_acceptor(
    listener: TcpListener,
    registry: Arc<Registry>,
    config: ServerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    while !*shutdown.borrow() {
        let (stream, addr): (TcpStream, SocketAddr) = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
        };

        debug!("Connection from {}", addr);
        tokio::select! {
            _ = shutdown.changed() => break,
            result = admit(stream, &registry, &config) => match result {
                Ok(id) => info!("Registered client {} from {}", id, addr),
                Err(e) => debug!("Rejected connection from {}: {}", addr, e),
            },
        }
    }
    debug!("Acceptor stopped");
}
