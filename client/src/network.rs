//! Client side of the handshake.

use crate::error::ConnectError;
use log::{debug, info};
use shared::codec::{decode_registration_ack, encode_registration};
use shared::{
    CodecError, Registration, SessionId, Transform, ACK_SUCCESS, HANDSHAKE_TAG,
    REGISTRATION_ACK_LEN,
};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{self, Duration};

/// Sends the tag and the registration, returning the id the server assigned.
pub async fn handshake<S>(stream: &mut S, registration: &Registration) -> Result<SessionId, ConnectError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(HANDSHAKE_TAG).await?;

    let mut ack = [0u8; 1];
    if stream.read(&mut ack).await? != 1 || ack[0] != ACK_SUCCESS {
        return Err(ConnectError::Rejected);
    }

    stream.write_all(&encode_registration(registration)?).await?;

    let mut ack = [0u8; REGISTRATION_ACK_LEN];
    match stream.read_exact(&mut ack).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(ConnectError::Rejected),
        Err(e) => return Err(e.into()),
    }

    match decode_registration_ack(&ack) {
        Ok(id) => Ok(id),
        Err(CodecError::Rejected) => Err(ConnectError::Rejected),
        Err(e) => Err(e.into()),
    }
}

/// Opens a connection to `host:port` and registers as `name` at `transform`.
pub async fn connect_stream(
    host: &str,
    port: u16,
    name: &str,
    transform: Transform,
    wait: Duration,
) -> Result<(TcpStream, SessionId), ConnectError> {
    let attempt = async {
        let mut stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        debug!("Connected to {}:{}, starting handshake", host, port);

        let registration = Registration::new(name, transform);
        let id = handshake(&mut stream, &registration).await?;
        Ok::<_, ConnectError>((stream, id))
    };

    let (stream, id) = time::timeout(wait, attempt)
        .await
        .map_err(|_| ConnectError::Timeout(wait))??;
    info!("Registered with {}:{} as {} (id {})", host, port, name, id);
    Ok((stream, id))
}
