//! Session supervision: one attempt, or retry with capped exponential
//! backoff when `exporter.reconnect` is on.

use std::time::Duration;

use tokio::sync::broadcast;

use cidwatch_core::config::ExporterConfig;

use super::{Session, SessionError};

pub const RECONNECT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// 1 s doubling, capped at `reconnect_max_backoff_secs` (at least 1 s).
    pub fn from_config(config: &ExporterConfig) -> Self {
        Self::new(
            RECONNECT_INITIAL_BACKOFF,
            Duration::from_secs(config.reconnect_max_backoff_secs.max(1)),
        )
    }

    /// Delay before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Drive `session` until shutdown. Without reconnect the first failure is
/// returned; with it, failures are logged and retried. The schedule starts
/// over after any attempt that reached STREAMING.
pub async fn run_sessions(
    session: &mut Session,
    mut backoff: ReconnectBackoff,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<(), SessionError> {
    let reconnect = session.config().reconnect;

    loop {
        let err = match session.run(shutdown).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if !reconnect {
            return Err(err);
        }

        if session.streamed() {
            backoff.reset();
        }
        let delay = backoff.next_delay();
        tracing::warn!(
            error = %err,
            backoff_ms = delay.as_millis() as u64,
            "exporter session failed, reconnecting"
        );

        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("shutdown during reconnect backoff");
                return Ok(());
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
