//! Append-only event log of a conversation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::message::{Message, MessageType};
use crate::fetch::HttpResponse;

/// Kind of a logged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Query arguments received on a callback
    HttpArgs,
    /// Raw HTTP response from the OP
    HttpResponse,
    ProtocolRequest,
    ProtocolResponse,
    /// URL the user agent was sent to
    RedirectUrl,
    /// Unparsed response body
    Response,
    /// Key set fetched from the OP
    Jwks,
}

/// Payload of a logged event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventData {
    Http(HttpResponse),
    Message(Message),
    Text(String),
    Args(Map<String, Value>),
    Json(Value),
}

impl EventData {
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            EventData::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_http(&self) -> Option<&HttpResponse> {
        match self {
            EventData::Http(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            EventData::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The payload rendered as text: strings as-is, everything else as JSON.
    pub fn to_text(&self) -> String {
        match self {
            EventData::Text(s) => s.clone(),
            EventData::Http(r) => r.body.clone(),
            EventData::Message(m) => Value::Object(m.claims.clone()).to_string(),
            EventData::Args(a) => Value::Object(a.clone()).to_string(),
            EventData::Json(v) => v.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub data: EventData,
    /// Seconds since the epoch
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// Ordered, append-only sequence of events.
///
/// Entries are never reordered or removed; every lookup preserves log order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventLog {
    events: Vec<Event>,
}

fn now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// Append an event stamped with the current time.
    pub fn push(&mut self, kind: EventKind, data: EventData) {
        self.push_at(kind, data, now());
    }

    pub fn push_at(&mut self, kind: EventKind, data: EventData, timestamp: f64) {
        self.events.push(Event {
            kind,
            data,
            timestamp,
            sender: None,
            reference: None,
        });
    }

    /// Append an event recording which check produced it.
    pub fn store(&mut self, kind: EventKind, data: EventData, sender: &str) {
        self.events.push(Event {
            kind,
            data,
            timestamp: now(),
            sender: Some(sender.to_string()),
            reference: None,
        });
    }

    pub fn append(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Most recent payload of `kind`.
    pub fn last_item(&self, kind: EventKind) -> Option<&EventData> {
        self.events
            .iter()
            .rev()
            .find(|e| e.kind == kind)
            .map(|e| &e.data)
    }

    /// All events of `kind`, oldest first.
    pub fn get(&self, kind: EventKind) -> Vec<&Event> {
        self.events.iter().filter(|e| e.kind == kind).collect()
    }

    pub fn get_data(&self, kind: EventKind) -> Vec<&EventData> {
        self.events
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| &e.data)
            .collect()
    }

    /// Timestamps of `kind` events carrying a message of `msg_type`.
    pub fn when(&self, kind: EventKind, msg_type: MessageType) -> Vec<f64> {
        self.events
            .iter()
            .filter(|e| e.kind == kind)
            .filter(|e| e.data.as_message().is_some_and(|m| m.msg_type == msg_type))
            .map(|e| e.timestamp)
            .collect()
    }

    /// Events logged strictly after `timestamp`.
    pub fn after(&self, timestamp: f64) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.timestamp > timestamp)
            .collect()
    }
}
