//! Decompress/decode stage for post-handshake frames.
//!
//! Each frame is a complete gzip stream. It is inflated fully into memory,
//! then parsed as an `IncomingMessage`. Failures here are per-message: the
//! caller logs and drops the frame and keeps reading.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;

use crate::event::{AmbiguousEvent, IncomingMessage, RawIncomingMessage};

/// Upper bound on an inflated frame. Guards against compression bombs.
pub const MAX_DECOMPRESSED_BYTES: usize = 64 * 1024 * 1024;

/// Bytes of payload text included in a decode-failure log line.
pub const PREVIEW_BYTES: usize = 512;

/// Inflate and decode one frame payload.
pub fn decode_frame(payload: &[u8]) -> Result<IncomingMessage, DecodeError> {
    let json = decompress(payload)?;
    decode_json(&json)
}

/// Parse an already-inflated event document.
pub fn decode_json(json: &[u8]) -> Result<IncomingMessage, DecodeError> {
    let raw: RawIncomingMessage =
        serde_json::from_slice(json).map_err(|source| DecodeError::Json {
            source,
            preview: payload_preview(json),
        })?;
    Ok(IncomingMessage::try_from(raw)?)
}

/// Inflate a gzip payload, bounded by `MAX_DECOMPRESSED_BYTES`.
pub fn decompress(payload: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut decoder = GzDecoder::new(payload);
    let mut out = Vec::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = decoder.read(&mut buffer).map_err(DecodeError::Decompress)?;
        if n == 0 {
            break;
        }
        if out.len() + n > MAX_DECOMPRESSED_BYTES {
            return Err(DecodeError::DecompressedTooLarge {
                max: MAX_DECOMPRESSED_BYTES,
            });
        }
        out.extend_from_slice(&buffer[..n]);
    }

    Ok(out)
}

/// Gzip a JSON document the way the exporter frames events.
pub fn compress_json<T: Serialize>(value: &T) -> std::io::Result<Vec<u8>> {
    let json = serde_json::to_vec(value)?;
    compress(&json)
}

pub fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Lossy, truncated text view of a payload for log lines.
pub fn payload_preview(bytes: &[u8]) -> String {
    let end = bytes.len().min(PREVIEW_BYTES);
    let mut text = String::from_utf8_lossy(&bytes[..end]).into_owned();
    if bytes.len() > PREVIEW_BYTES {
        text.push_str("...");
    }
    text
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("gzip decompression failed: {0}")]
    Decompress(std::io::Error),

    #[error("decompressed payload exceeds {max} bytes")]
    DecompressedTooLarge { max: usize },

    #[error("malformed event JSON: {source}")]
    Json {
        source: serde_json::Error,
        preview: String,
    },

    #[error(transparent)]
    Ambiguous(#[from] AmbiguousEvent),
}

impl DecodeError {
    /// Inflated text of the offending document, when decompression got
    /// that far.
    pub fn decoded_preview(&self) -> Option<&str> {
        match self {
            DecodeError::Json { preview, .. } => Some(preview),
            _ => None,
        }
    }
}
