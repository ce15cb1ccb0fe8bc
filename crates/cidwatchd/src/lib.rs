//! cidwatchd internals: the exporter session and its supervisor, the
//! ingestion loop, the event router and shutdown fan-out. The binary wires
//! these to the services crate.

pub mod dispatch;
pub mod ingest;
pub mod session;
pub mod shutdown;

pub use dispatch::{EventRouter, Routed};
pub use session::{run_sessions, ConnectionState, ReconnectBackoff, Session, SessionError};
