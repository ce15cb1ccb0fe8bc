//! Exporter wire format: length-prefixed frames over a TCP byte stream.
//!
//! Every message in either direction is a 4-byte big-endian length followed
//! by exactly that many payload bytes. The first frame each way is a JSON
//! `VersionMessage`. Every later exporter→client frame is a gzip-compressed
//! JSON event document (see `decode`).

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Protocol version spoken by the metrics exporter.
pub const PROTOCOL_VERSION: u16 = 3;

/// Size of the big-endian length prefix in front of every frame.
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Largest frame accepted by default. Matches the exporter's framing
/// library; anything larger is treated as a corrupt prefix.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Seconds allowed for the version exchange before the session is abandoned.
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 10;

// ── Version message ───────────────────────────────────────────────────────────

/// Exchanged exactly once in each direction, immediately after connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMessage {
    pub version: u16,
}

impl VersionMessage {
    pub fn new(version: u16) -> Self {
        Self { version }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

// ── Frame transport ───────────────────────────────────────────────────────────

/// Length-prefixed codec over any async byte stream.
///
/// Reads block until both the prefix and the full payload are available.
/// Writes put prefix and payload on the stream as a single buffer so a
/// frame is never interleaved with another writer's bytes.
pub struct FrameTransport<S> {
    stream: S,
    max_frame_bytes: usize,
}

impl<S> FrameTransport<S> {
    pub fn new(stream: S) -> Self {
        Self::with_max_frame_bytes(stream, MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_bytes(stream: S, max_frame_bytes: usize) -> Self {
        Self {
            stream,
            max_frame_bytes,
        }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncRead + Unpin> FrameTransport<S> {
    /// Read one frame and return its payload.
    pub async fn read_frame(&mut self) -> Result<Bytes, WireError> {
        let mut prefix = [0u8; LENGTH_PREFIX_BYTES];
        self.stream
            .read_exact(&mut prefix)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => WireError::ConnectionClosed,
                _ => WireError::Io(e),
            })?;

        let len = u32::from_be_bytes(prefix) as usize;
        if len > self.max_frame_bytes {
            return Err(WireError::FrameTooLarge {
                len,
                max: self.max_frame_bytes,
            });
        }

        let mut payload = BytesMut::zeroed(len);
        self.stream
            .read_exact(&mut payload[..])
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => WireError::ShortRead { expected: len },
                _ => WireError::Io(e),
            })?;

        Ok(payload.freeze())
    }
}

impl<S: AsyncWrite + Unpin> FrameTransport<S> {
    /// Write one frame: prefix + payload.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), WireError> {
        if payload.len() > self.max_frame_bytes || payload.len() > u32::MAX as usize {
            return Err(WireError::FrameTooLarge {
                len: payload.len(),
                max: self.max_frame_bytes,
            });
        }

        let mut buf = Vec::with_capacity(LENGTH_PREFIX_BYTES + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload);

        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Transport-level failures. Every one of these ends the session.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("short read: connection closed before {expected} payload bytes arrived")]
    ShortRead { expected: usize },

    #[error("frame length {len} exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode frame payload: {0}")]
    Encode(serde_json::Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
