//! Connection handshake
//!
//! Run once on every new master/slave connection before any other traffic.
//! The master dials and initiates; the slave responds.
//!
//! ```text
//! master                                slave
//!   │ ── L1 request (100) ───────────────► │
//!   │ ◄── 201 auth required / 200 ok ───── │
//!   │ ── secret (only after 201) ────────► │
//!   │ ◄── 210 ok / 212 refuse ──────────── │
//!   │ ── master name ────────────────────► │
//!   │ ◄── slave name ───────────────────── │
//!   │ ── L3 ok (220) ────────────────────► │
//! ```
//!
//! Every read is bounded by the handshake timeout. Markers and names travel
//! in ordinary length-prefixed frames. On a failed read the side that noticed
//! sends the matching bad/timeout marker of its level before giving up.

use crate::framing::{FrameReader, FrameWriter, ReadFrame};
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Handshake marker bytes
pub mod markers {
    pub const L1_REQUEST: u8 = 100;

    pub const L1_OK: u8 = 200;
    pub const L1_AUTH: u8 = 201;
    pub const L1_BAD: u8 = 202;
    pub const L1_REFUSE: u8 = 203;
    pub const L1_TIMEOUT: u8 = 204;

    pub const L2_OK: u8 = 210;
    pub const L2_BAD: u8 = 211;
    pub const L2_REFUSE: u8 = 212;
    pub const L2_TIMEOUT: u8 = 213;

    pub const L3_OK: u8 = 220;
    pub const L3_BAD: u8 = 221;
    pub const L3_TIMEOUT: u8 = 222;
}

/// Status code of a successful handshake
pub const STATUS_SUCCESS: i8 = 1;

/// Default bound on every handshake read
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Terminal handshake outcomes other than success
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandshakeFailure {
    #[error("bad connection")]
    BadConnection,

    #[error("time out")]
    Timeout,

    #[error("internal server error")]
    ServerError,

    #[error("unknown error")]
    Unknown,

    #[error("connection refused")]
    Refused,
}

impl HandshakeFailure {
    /// Numeric status code
    pub fn status_code(self) -> i8 {
        match self {
            HandshakeFailure::BadConnection => -1,
            HandshakeFailure::Timeout => -2,
            HandshakeFailure::ServerError => -3,
            HandshakeFailure::Unknown => -4,
            HandshakeFailure::Refused => -5,
        }
    }

    /// Worth dialing the same peer again later
    pub fn is_retriable(self) -> bool {
        !matches!(self, HandshakeFailure::Refused)
    }
}

/// The authenticated peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    pub name: String,
}

/// Local side of the handshake
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Name announced to the peer
    pub node_name: String,
    /// Shared secret; empty or `None` disables authentication
    pub secret: Option<String>,
    /// Bound on each read
    pub timeout: Duration,
}

impl HandshakeConfig {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            secret: None,
            timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_secret(mut self, secret: Option<String>) -> Self {
        self.secret = secret.filter(|s| !s.is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|s| !s.is_empty())
    }
}

type Outcome<T> = std::result::Result<T, HandshakeFailure>;

async fn send<W: AsyncWrite + Unpin>(writer: &mut FrameWriter<W>, payload: &[u8]) -> Outcome<()> {
    writer.write_frame(payload).await.map_err(|e| {
        debug!(error = %e, "Handshake write failed");
        HandshakeFailure::ServerError
    })
}

/// Best-effort failure marker; the connection is being dropped anyway
async fn notify<W: AsyncWrite + Unpin>(writer: &mut FrameWriter<W>, marker: u8) {
    let _ = writer.write_frame(&[marker]).await;
}

/// Read one frame, answering a failed read with the level's bad/timeout marker
async fn receive<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    limit: Duration,
    on_closed: Option<u8>,
    on_timeout: Option<u8>,
) -> Outcome<Bytes>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match reader.read_frame_timeout(limit).await {
        ReadFrame::Frame(payload) => Ok(payload),
        ReadFrame::Closed => {
            if let Some(marker) = on_closed {
                notify(writer, marker).await;
            }
            Err(HandshakeFailure::BadConnection)
        }
        ReadFrame::Timeout => {
            if let Some(marker) = on_timeout {
                notify(writer, marker).await;
            }
            Err(HandshakeFailure::Timeout)
        }
    }
}

fn is_marker(payload: &[u8], marker: u8) -> bool {
    payload == [marker]
}

/// Run the master side of the handshake
pub async fn initiate<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    config: &HandshakeConfig,
) -> Outcome<PeerIdentity>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // L1
    send(writer, &[markers::L1_REQUEST]).await?;
    let reply = receive(reader, writer, config.timeout, None, None).await?;

    match &reply[..] {
        [markers::L1_OK] => {}
        [markers::L1_AUTH] => {
            // L2
            let secret = config.secret().unwrap_or_default();
            debug!("Sending authentication secret");
            send(writer, secret.as_bytes()).await?;
            let reply = receive(reader, writer, config.timeout, None, None).await?;
            match &reply[..] {
                [markers::L2_OK] => {}
                [markers::L2_BAD] => return Err(HandshakeFailure::BadConnection),
                [markers::L2_TIMEOUT] => return Err(HandshakeFailure::Timeout),
                _ => return Err(HandshakeFailure::Refused),
            }
        }
        [markers::L1_BAD] => return Err(HandshakeFailure::BadConnection),
        [markers::L1_TIMEOUT] => return Err(HandshakeFailure::Timeout),
        _ => return Err(HandshakeFailure::Refused),
    }

    // L3
    send(writer, config.node_name.as_bytes()).await?;
    let name = receive(
        reader,
        writer,
        config.timeout,
        Some(markers::L3_BAD),
        Some(markers::L3_TIMEOUT),
    )
    .await?;
    send(writer, &[markers::L3_OK]).await?;

    let peer = PeerIdentity {
        name: String::from_utf8_lossy(&name).into_owned(),
    };
    info!(peer = %peer.name, "Connected to slave");
    Ok(peer)
}

/// Run the slave side of the handshake
pub async fn respond<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    config: &HandshakeConfig,
) -> Outcome<PeerIdentity>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // L1
    let request = receive(
        reader,
        writer,
        config.timeout,
        Some(markers::L1_BAD),
        Some(markers::L1_TIMEOUT),
    )
    .await?;
    if !is_marker(&request, markers::L1_REQUEST) {
        warn!("Unexpected handshake opening, refusing");
        notify(writer, markers::L1_REFUSE).await;
        return Err(HandshakeFailure::Refused);
    }

    match config.secret() {
        Some(secret) => {
            // L2
            debug!("Authenticating master");
            send(writer, &[markers::L1_AUTH]).await?;
            let offered = receive(
                reader,
                writer,
                config.timeout,
                Some(markers::L2_BAD),
                Some(markers::L2_TIMEOUT),
            )
            .await?;
            if &offered[..] != secret.as_bytes() {
                warn!("Master offered wrong secret, refusing");
                notify(writer, markers::L2_REFUSE).await;
                return Err(HandshakeFailure::Refused);
            }
            send(writer, &[markers::L2_OK]).await?;
        }
        None => send(writer, &[markers::L1_OK]).await?,
    }

    // L3
    let name = receive(
        reader,
        writer,
        config.timeout,
        Some(markers::L3_BAD),
        Some(markers::L3_TIMEOUT),
    )
    .await?;
    send(writer, config.node_name.as_bytes()).await?;

    let ack = receive(reader, writer, config.timeout, None, None).await?;
    match &ack[..] {
        [markers::L3_OK] => {}
        [markers::L3_BAD] => return Err(HandshakeFailure::BadConnection),
        [markers::L3_TIMEOUT] => return Err(HandshakeFailure::Timeout),
        _ => return Err(HandshakeFailure::Refused),
    }

    let peer = PeerIdentity {
        name: String::from_utf8_lossy(&name).into_owned(),
    };
    info!(peer = %peer.name, "Connected to master");
    Ok(peer)
}
