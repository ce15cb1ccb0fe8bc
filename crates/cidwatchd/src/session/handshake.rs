//! Version exchange, run once right after connect.
//!
//! The exporter speaks first. We read its `VersionMessage`; on a mismatch
//! we fail without writing anything, otherwise we answer with our own.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use cidwatch_core::wire::HANDSHAKE_TIMEOUT_SECS;
use cidwatch_core::{FrameTransport, VersionMessage, WireError};

/// Returns the exporter's announced version on success.
pub async fn handshake<S>(
    transport: &mut FrameTransport<S>,
    local_version: u16,
) -> Result<VersionMessage, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tokio::time::timeout(
        Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
        exchange(transport, local_version),
    )
    .await
    .map_err(|_| HandshakeError::Timeout(HANDSHAKE_TIMEOUT_SECS))?
}

async fn exchange<S>(
    transport: &mut FrameTransport<S>,
    local_version: u16,
) -> Result<VersionMessage, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = transport.read_frame().await.map_err(HandshakeError::Receive)?;
    let remote = VersionMessage::decode(&frame).map_err(HandshakeError::Decode)?;

    if remote.version != local_version {
        return Err(HandshakeError::VersionMismatch {
            expected: local_version,
            received: remote.version,
        });
    }

    let reply = VersionMessage::new(local_version)
        .encode()
        .map_err(HandshakeError::Send)?;
    transport.write_frame(&reply).await.map_err(HandshakeError::Send)?;

    tracing::info!(version = remote.version, "handshake complete");
    Ok(remote)
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("failed to read exporter version: {0}")]
    Receive(WireError),

    #[error("malformed version message: {0}")]
    Decode(serde_json::Error),

    #[error("protocol version mismatch: expected {expected}, exporter sent {received}")]
    VersionMismatch { expected: u16, received: u16 },

    #[error("failed to send local version: {0}")]
    Send(WireError),

    #[error("no version message within {0}s")]
    Timeout(u64),
}
