//! Post-handshake read loop.
//!
//! Frames are pulled strictly in arrival order. A frame that fails to
//! decompress or decode is logged with its text and dropped; only transport
//! errors end the loop.

use tokio::io::AsyncRead;
use tokio::sync::broadcast;

use cidwatch_core::decode::payload_preview;
use cidwatch_core::{decode_frame, FrameTransport, WireError};
use cidwatch_services::PipelineStats;

use crate::dispatch::EventRouter;

/// Returns `Ok(())` when stopped by `shutdown`.
pub async fn ingest_loop<S>(
    transport: &mut FrameTransport<S>,
    router: &EventRouter,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<(), WireError>
where
    S: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("ingestion stopping on shutdown");
                return Ok(());
            }
            frame = transport.read_frame() => frame?,
        };
        PipelineStats::incr(&router.stats().frames_received);

        let msg = match decode_frame(&frame) {
            Ok(msg) => msg,
            Err(e) => {
                PipelineStats::incr(&router.stats().frames_dropped);
                let preview = e
                    .decoded_preview()
                    .map(str::to_owned)
                    .unwrap_or_else(|| payload_preview(&frame));
                tracing::warn!(error = %e, len = frame.len(), payload = %preview, "dropping undecodable frame");
                continue;
            }
        };

        router.route(msg).await;
    }
}
