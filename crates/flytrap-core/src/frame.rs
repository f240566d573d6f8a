//! Wire frames for the real-time channel
//!
//! Everything on the live connection is a JSON frame
//! `{type, payload, timestamp}`. The `type` string maps onto [`EventKind`];
//! names nobody recognizes map to [`EventKind::Unknown`] and still flow
//! through routing, so new server-side event types never crash an older
//! client. Frames exist only on the wire and are never persisted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{FrameError, Result};
use crate::intel::Entity;
use crate::message::{Message, MessageRole};
use crate::session::{RiskLevel, SessionPatch, SessionStatus, SessionSummary};
use crate::types::{MessageId, SessionId, Timestamp};

// ----------------------------------------------------------------------------
// Event Kind
// ----------------------------------------------------------------------------

/// Name of a real-time event, as carried in a frame's `type` field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    Connected,
    Disconnected,
    Error,
    MessageReceived,
    MessageSent,
    TypingStart,
    TypingStop,
    SessionStarted,
    SessionEnded,
    SessionUpdated,
    IntelligenceEntity,
    IntelligenceScam,
    IntelligenceRisk,
    /// Any event name this client does not recognize; routed unchanged
    Unknown(String),
}

impl EventKind {
    /// The wire name of this event
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::Error => "error",
            EventKind::MessageReceived => "message:received",
            EventKind::MessageSent => "message:sent",
            EventKind::TypingStart => "typing:start",
            EventKind::TypingStop => "typing:stop",
            EventKind::SessionStarted => "session:started",
            EventKind::SessionEnded => "session:ended",
            EventKind::SessionUpdated => "session:updated",
            EventKind::IntelligenceEntity => "intelligence:entity",
            EventKind::IntelligenceScam => "intelligence:scam",
            EventKind::IntelligenceRisk => "intelligence:risk",
            EventKind::Unknown(name) => name.as_str(),
        }
    }

    /// Whether this is a name the client recognizes
    pub fn is_known(&self) -> bool {
        !matches!(self, EventKind::Unknown(_))
    }
}

impl From<String> for EventKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "connected" => EventKind::Connected,
            "disconnected" => EventKind::Disconnected,
            "error" => EventKind::Error,
            "message:received" => EventKind::MessageReceived,
            "message:sent" => EventKind::MessageSent,
            "typing:start" => EventKind::TypingStart,
            "typing:stop" => EventKind::TypingStop,
            "session:started" => EventKind::SessionStarted,
            "session:ended" => EventKind::SessionEnded,
            "session:updated" => EventKind::SessionUpdated,
            "intelligence:entity" => EventKind::IntelligenceEntity,
            "intelligence:scam" => EventKind::IntelligenceScam,
            "intelligence:risk" => EventKind::IntelligenceRisk,
            _ => EventKind::Unknown(name),
        }
    }
}

impl From<&str> for EventKind {
    fn from(name: &str) -> Self {
        EventKind::from(name.to_string())
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One structured unit of data on the real-time channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

impl Frame {
    /// Create a frame with no timestamp
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            timestamp: None,
        }
    }

    /// Attach a send/receive timestamp
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Parse a frame from raw wire text
    ///
    /// Callers at the transport boundary treat a parse failure as a frame
    /// to discard, not an error to propagate.
    pub fn parse(text: &str) -> Result<Frame> {
        serde_json::from_str(text).map_err(|e| {
            FrameError::Malformed {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Serialize this frame to wire text
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode the payload into a typed shape
    pub fn decode_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            FrameError::PayloadShape {
                event: self.kind.as_str().to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

// ----------------------------------------------------------------------------
// Typed Payloads
// ----------------------------------------------------------------------------

/// Payload of `message:received` and `message:sent`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMessage {
    pub id: MessageId,
    pub session_id: SessionId,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub turn: Option<u32>,
}

impl LiveMessage {
    /// Convert into a server-confirmed message record
    pub fn into_message(self) -> Message {
        Message::confirmed(
            self.id,
            self.session_id,
            self.role,
            self.content,
            self.timestamp,
            self.turn,
        )
    }
}

/// Payload of `session:started` and `session:updated`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUpdatePayload {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub patch: SessionPatch,
}

/// Payload of `session:ended`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEndedPayload {
    pub session_id: SessionId,
    #[serde(default)]
    pub status: Option<SessionStatus>,
    #[serde(default)]
    pub summary: Option<SessionSummary>,
}

/// Payload of `intelligence:entity`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityPayload {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub entity: Entity,
}

/// Payload of `intelligence:scam`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScamPayload {
    pub session_id: SessionId,
    pub scam_type: String,
    pub confidence: f32,
}

/// Payload of `intelligence:risk`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskPayload {
    pub session_id: SessionId,
    #[serde(default)]
    pub risk_level: Option<RiskLevel>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl RiskPayload {
    /// The carried risk level, or one derived from the carried confidence
    pub fn effective_risk(&self) -> Option<RiskLevel> {
        self.risk_level
            .or_else(|| self.confidence.map(RiskLevel::from_confidence))
    }
}

/// Payload of `typing:start` and `typing:stop`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingPayload {
    pub session_id: SessionId,
}

/// Payload of transport-level `error` events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
