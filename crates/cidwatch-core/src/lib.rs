//! cidwatch-core: exporter wire format, event schema, and configuration.
//! The daemon and the services crate both depend on this one.

pub mod cid;
pub mod config;
pub mod decode;
pub mod event;
pub mod retry;
pub mod wire;

pub use cid::{Cid, CidError};
pub use decode::{decode_frame, DecodeError};
pub use event::{BitswapMessage, ConnectionEvent, Event, EventKind, IncomingMessage};
pub use retry::{RetryPolicy, Retryable};
pub use wire::{FrameTransport, VersionMessage, WireError};
