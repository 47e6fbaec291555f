//! Per-connection socket task.
//!
//! Each accepted socket runs in its own task: it waits for the opening
//! handshake, then reports itself to the server loop and relays queued frames
//! until either side closes.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};

use crate::handshake::{self, HandshakeError};
use crate::registry::{Connection, ConnectionId, Outbound};

const READ_CHUNK: usize = 4096;

/// Lifecycle notification sent from a connection task to the server loop.
#[derive(Debug)]
pub(crate) enum ConnectionEvent {
    /// Handshake completed; the connection accepts frames.
    Opened(Connection),
    /// The socket closed or failed after opening.
    Closed(ConnectionId),
}

/// Drive one accepted socket to completion.
pub(crate) async fn run(
    stream: TcpStream,
    peer: SocketAddr,
    id: ConnectionId,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    mut closing: watch::Receiver<bool>,
) {
    let (mut reader, mut writer) = stream.into_split();

    if !await_handshake(&mut reader, &mut writer, peer, &mut closing).await {
        return;
    }

    let (tx, outbound) = mpsc::unbounded_channel();
    if events
        .send(ConnectionEvent::Opened(Connection::new(id, peer, tx)))
        .is_err()
    {
        // Server loop already gone.
        return;
    }

    relay(reader, writer, peer, outbound).await;
    let _ = events.send(ConnectionEvent::Closed(id));
}

/// Read until a handshake succeeds. Returns `false` if the socket must close.
async fn await_handshake(
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    peer: SocketAddr,
    closing: &mut watch::Receiver<bool>,
) -> bool {
    let mut request = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let read = tokio::select! {
            read = reader.read(&mut chunk) => read,
            _ = closing.changed() => return false,
        };

        let n = match read {
            Ok(0) => {
                tracing::debug!(%peer, "Client left before handshake");
                return false;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(%peer, error = %e, "Read failed before handshake");
                return false;
            }
        };
        request.extend_from_slice(&chunk[..n]);

        match handshake::try_handshake(&request) {
            Ok(response) => {
                if let Err(e) = writer.write_all(&response).await {
                    tracing::debug!(%peer, error = %e, "Failed to write handshake response");
                    return false;
                }
                return true;
            }
            Err(HandshakeError::Incomplete) => {}
            Err(HandshakeError::NotUpgrade) => {
                log_client_message(peer, &request);
                request.clear();
            }
            Err(e) => {
                tracing::warn!(%peer, error = %e, "Rejecting connection");
                return false;
            }
        }
    }
}

/// Relay queued frames to the socket and log anything the client sends.
async fn relay(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    peer: SocketAddr,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        tokio::select! {
            read = reader.read(&mut chunk) => match read {
                Ok(0) => break,
                Ok(n) => log_client_message(peer, &chunk[..n]),
                Err(e) => {
                    tracing::debug!(%peer, error = %e, "Connection error");
                    break;
                }
            },
            message = outbound.recv() => match message {
                Some(Outbound::Frame(frame)) => {
                    if let Err(e) = writer.write_all(frame.as_bytes()).await {
                        tracing::debug!(%peer, error = %e, "Write failed");
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = writer.shutdown().await;
                    break;
                }
            },
        }
    }
}

/// Client frames are not decoded; the raw bytes are logged as text.
fn log_client_message(peer: SocketAddr, bytes: &[u8]) {
    tracing::debug!(%peer, message = %String::from_utf8_lossy(bytes), "Received client message");
}
