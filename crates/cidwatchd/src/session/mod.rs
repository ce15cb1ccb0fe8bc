//! Exporter session: connect, handshake, then stream frames until the
//! connection fails or shutdown is requested.

pub mod handshake;
pub mod reconnect;
pub mod state;

pub use handshake::{handshake, HandshakeError};
pub use reconnect::{run_sessions, ReconnectBackoff};
pub use state::{ConnectionState, StateTracker};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use cidwatch_core::config::ExporterConfig;
use cidwatch_core::{FrameTransport, WireError};

use crate::dispatch::EventRouter;
use crate::ingest::ingest_loop;

pub struct Session {
    config: ExporterConfig,
    router: EventRouter,
    state: StateTracker,
    streamed: bool,
}

impl Session {
    pub fn new(config: ExporterConfig, router: EventRouter) -> Self {
        Self {
            config,
            router,
            state: StateTracker::new(),
            streamed: false,
        }
    }

    pub fn config(&self) -> &ExporterConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    /// Whether the last run got as far as STREAMING.
    pub fn streamed(&self) -> bool {
        self.streamed
    }

    /// One connection attempt, start to finish. `Ok(())` means shutdown was
    /// requested; every error leaves the session FAILED.
    pub async fn run(&mut self, shutdown: &mut broadcast::Receiver<()>) -> Result<(), SessionError> {
        if self.state().is_terminal() {
            self.state.advance(ConnectionState::Disconnected);
        }
        self.streamed = false;

        let addr = self.config.socket_addr();
        self.state.advance(ConnectionState::Connecting);
        tracing::info!(exporter = %addr, "connecting to exporter");

        let stream = tokio::select! {
            _ = shutdown.recv() => {
                self.state.advance(ConnectionState::Closed);
                return Ok(());
            }
            r = TcpStream::connect(&addr) => r,
        };
        let stream = match stream {
            Ok(s) => s,
            Err(source) => {
                self.state.advance(ConnectionState::Failed);
                return Err(SessionError::Connect { addr, source });
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "failed to set TCP_NODELAY");
        }

        self.run_on(stream, shutdown).await
    }

    /// Handshake and stream over an already-connected byte stream.
    pub async fn run_on<S>(
        &mut self,
        stream: S,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut transport = FrameTransport::with_max_frame_bytes(stream, self.config.max_frame_bytes);

        self.state.advance(ConnectionState::Handshaking);
        if let Err(e) = handshake(&mut transport, self.config.protocol_version).await {
            self.state.advance(ConnectionState::Failed);
            return Err(SessionError::Handshake(e));
        }

        self.state.advance(ConnectionState::Streaming);
        self.streamed = true;

        match ingest_loop(&mut transport, &self.router, shutdown).await {
            Ok(()) => {
                self.state.advance(ConnectionState::Closed);
                Ok(())
            }
            Err(e) => {
                self.state.advance(ConnectionState::Failed);
                Err(SessionError::Transport(e))
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("transport failed: {0}")]
    Transport(#[from] WireError),
}
