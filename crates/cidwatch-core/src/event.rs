//! Event schema pushed by the metrics exporter.
//!
//! On the wire an event carries two optional fields, `bitswap_message` and
//! `connection_event`, at most one of which is set. Decoding folds them into
//! `EventKind` so the exclusivity is a property of the type. A document with
//! both set is rejected.

use serde::{Deserialize, Deserializer};

use crate::cid::Cid;

/// Top-level document carried by every post-handshake frame.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// `None` when the exporter pushed something other than an event.
    pub event: Option<Event>,
}

#[derive(Debug, Clone)]
pub struct Event {
    /// RFC 3339 timestamp assigned by the exporter. Defines event ordering
    /// on the exporter side; kept opaque here.
    pub timestamp: String,
    /// Base58 peer ID of the remote peer.
    pub peer: String,
    pub kind: EventKind,
}

#[derive(Debug, Clone)]
pub enum EventKind {
    Bitswap(BitswapMessage),
    Connection(ConnectionEvent),
    None,
}

// ── Bitswap ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BitswapMessage {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub wantlist_entries: Vec<WantlistEntry>,

    /// Whether the entries replace the peer's whole want-list.
    #[serde(default)]
    pub full_wantlist: bool,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub blocks: Vec<Cid>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub block_presences: Vec<BlockPresence>,

    /// Underlay addresses of the peer at the time the message was received.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub connected_addresses: Vec<String>,
}

/// One want-list entry. Field names follow the exporter's encoding.
#[derive(Debug, Clone, Deserialize)]
pub struct WantlistEntry {
    #[serde(rename = "Cid")]
    pub cid: Cid,

    #[serde(rename = "Priority", default)]
    pub priority: i32,

    /// 0 = want-block, 1 = want-have.
    #[serde(rename = "WantType", default)]
    pub want_type: i32,

    #[serde(rename = "Cancel", default)]
    pub cancel: bool,

    #[serde(rename = "SendDontHave", default)]
    pub send_dont_have: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockPresence {
    pub cid: Cid,

    #[serde(rename = "block_presence_type")]
    pub presence: BlockPresenceType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum BlockPresenceType {
    Have,
    DontHave,
}

impl TryFrom<u8> for BlockPresenceType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(BlockPresenceType::Have),
            1 => Ok(BlockPresenceType::DontHave),
            other => Err(format!("unknown block presence type {other}")),
        }
    }
}

// ── Connection events ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionEvent {
    /// Multiaddress of the remote peer.
    #[serde(default)]
    pub remote: String,

    pub connection_event_type: ConnectionEventType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum ConnectionEventType {
    Connected,
    Disconnected,
}

impl TryFrom<u8> for ConnectionEventType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ConnectionEventType::Connected),
            1 => Ok(ConnectionEventType::Disconnected),
            other => Err(format!("unknown connection event type {other}")),
        }
    }
}

// ── Raw wire shape ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(crate) struct RawIncomingMessage {
    #[serde(default)]
    pub(crate) event: Option<RawEvent>,
}

#[derive(Deserialize)]
pub(crate) struct RawEvent {
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    peer: String,
    #[serde(default)]
    bitswap_message: Option<BitswapMessage>,
    #[serde(default)]
    connection_event: Option<ConnectionEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("event carries both a bitswap message and a connection event")]
pub struct AmbiguousEvent;

impl TryFrom<RawEvent> for Event {
    type Error = AmbiguousEvent;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        let kind = match (raw.bitswap_message, raw.connection_event) {
            (Some(_), Some(_)) => return Err(AmbiguousEvent),
            (Some(msg), None) => EventKind::Bitswap(msg),
            (None, Some(conn)) => EventKind::Connection(conn),
            (None, None) => EventKind::None,
        };
        Ok(Event {
            timestamp: raw.timestamp,
            peer: raw.peer,
            kind,
        })
    }
}

impl TryFrom<RawIncomingMessage> for IncomingMessage {
    type Error = AmbiguousEvent;

    fn try_from(raw: RawIncomingMessage) -> Result<Self, Self::Error> {
        Ok(IncomingMessage {
            event: raw.event.map(Event::try_from).transpose()?,
        })
    }
}

/// The exporter encodes empty lists as `null`.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
