//! Inbound message model for the live feed
//!
//! Every frame from the push endpoint is a JSON object whose optional `type`
//! field selects semantics. Reserved types are `snapshot` (sent once after the
//! connection opens), `pong` (keepalive acknowledgment) and `heartbeat`
//! (periodic server liveness event). Desk events carry no `type` at all and
//! are identified by their `event_type`/`source`/`payload` fields instead.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Decoded inbound message envelope
///
/// `type` and `ts` are pulled out because the client routes on them; every
/// other field stays in `fields` untouched so the rendering layer sees the
/// payload exactly as the server produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Wire `type` of the message, if the server set one
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// ISO-8601 timestamp, if the server set one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
    /// Remaining fields of the JSON object
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Envelope {
    /// Build an envelope from raw parts (used for locally synthesized records)
    pub fn new(type_name: Option<&str>, ts: Option<String>, fields: Map<String, Value>) -> Self {
        Self {
            type_name: type_name.map(str::to_string),
            ts,
            fields,
        }
    }

    /// The specific event kind carried by the `type` field, if any
    pub fn kind(&self) -> Option<EventKind> {
        self.type_name.as_deref().map(EventKind::from_name)
    }

    /// Look up a payload field by name
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Event name used for subscription and dispatch
///
/// The reserved kinds get their own variants so routing on them is checked at
/// compile time; everything else (application event types such as
/// `RISK_THROTTLE` or `heartbeat`) goes through `Custom`. `Message` is the
/// generic channel every decoded payload is dispatched under, in addition to
/// its specific kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Generic channel, fired for every decoded payload
    Message,
    /// Connection-established notice, first message after an open
    Snapshot,
    /// Keepalive acknowledgment
    Pong,
    /// Synthetic lifecycle event, generated locally on open/close
    ConnectionChange,
    /// Any other event type the server emits
    Custom(String),
}

impl EventKind {
    /// Map a wire event name onto a kind
    pub fn from_name(name: &str) -> Self {
        match name {
            "message" => EventKind::Message,
            "snapshot" => EventKind::Snapshot,
            "pong" => EventKind::Pong,
            "connectionChange" => EventKind::ConnectionChange,
            other => EventKind::Custom(other.to_string()),
        }
    }

    /// The wire name of this kind
    pub fn name(&self) -> &str {
        match self {
            EventKind::Message => "message",
            EventKind::Snapshot => "snapshot",
            EventKind::Pong => "pong",
            EventKind::ConnectionChange => "connectionChange",
            EventKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value handed to subscriber callbacks
#[derive(Debug, Clone)]
pub enum LiveEvent {
    /// A decoded server message
    Payload(Envelope),
    /// Local connectivity transition (true = connected)
    ConnectionChange(bool),
}

impl LiveEvent {
    /// The envelope, if this event carries a server payload
    pub fn payload(&self) -> Option<&Envelope> {
        match self {
            LiveEvent::Payload(envelope) => Some(envelope),
            LiveEvent::ConnectionChange(_) => None,
        }
    }
}
