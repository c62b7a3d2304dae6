//! Core types for the event source.

use serde::Serialize;
use std::fmt;

/// Event type reported for records without an `event` field.
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// Coarse connection phase of an [`EventSource`](crate::EventSource).
///
/// - `Connecting`: a request is in flight, or a reconnect is about to be issued
/// - `Open`: response headers arrived and events are being delivered
/// - `Closed`: nothing in flight; the initial state and the state after
///   `close()`, a 204 response, or a terminal error
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ReadyState {
    Connecting,
    Open,
    #[default]
    Closed,
}

impl ReadyState {
    /// Convert to the lowercase name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadyState::Connecting => "connecting",
            ReadyState::Open => "open",
            ReadyState::Closed => "closed",
        }
    }

    /// Check if this is the closed state
    pub fn is_closed(&self) -> bool {
        matches!(self, ReadyState::Closed)
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event delivered to a message or named-event handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct MessageEvent {
    /// The record's `id` field, if it carried one.
    pub id: Option<String>,
    /// The event type; `"message"` for the default handler.
    pub event: String,
    /// The joined `data` payload.
    pub data: String,
}

impl MessageEvent {
    pub(crate) fn new(id: Option<String>, event: impl Into<String>, data: String) -> Self {
        Self {
            id,
            event: event.into(),
            data,
        }
    }
}
