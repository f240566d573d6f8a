//! Message records and delivery status tracking
//!
//! A message enters the log from one of three sources: an optimistic local
//! send, one-shot history hydration, or a live transport event. Records
//! from different sources describing the same logical message are collapsed
//! by the reconciler; this module defines the record itself and its
//! delivery-status lifecycle `sending -> sent -> delivered` (or `error`).

use serde::{Deserialize, Serialize};

use crate::intel::Entity;
use crate::types::{MessageId, SessionId, Timestamp};

// ----------------------------------------------------------------------------
// Message Role
// ----------------------------------------------------------------------------

/// Who produced a message within an engagement session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The scammer side of the conversation (operator-relayed input)
    Scammer,
    /// The engagement agent speaking in its victim persona
    Victim,
    /// Client- or server-generated notices
    System,
}

impl MessageRole {
    /// Stable lowercase name as used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::Scammer => "scammer",
            MessageRole::Victim => "victim",
            MessageRole::System => "system",
        }
    }
}

impl core::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Delivery Status
// ----------------------------------------------------------------------------

/// Failure descriptor attached to a message whose send was rejected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendFailure {
    /// Stable failure code, e.g. `SEND_FAILED`
    pub code: String,
    /// Human-readable description of what went wrong
    pub message: String,
    /// Whether the caller may retry this message
    pub retry_available: bool,
}

impl SendFailure {
    /// Standard failure for a rejected send request
    pub fn send_failed<M: Into<String>>(message: M) -> Self {
        Self {
            code: "SEND_FAILED".to_string(),
            message: message.into(),
            retry_available: true,
        }
    }
}

/// Delivery status of a message record
///
/// Status only moves forward (`sending < sent < delivered`); a confirmation
/// arriving for a failed message clears the error. The reconciler enforces
/// both rules during merges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "failure", rename_all = "lowercase")]
pub enum DeliveryState {
    /// Optimistically appended, not yet acknowledged by the server
    Sending,
    /// Acknowledged by the request/response service
    Sent,
    /// Confirmed delivered (history records and live events arrive here)
    Delivered,
    /// Send rejected; the record stays visible so the user can retry
    Error(SendFailure),
}

impl DeliveryState {
    /// Forward-progress rank used by the merge policy
    pub(crate) fn rank(&self) -> u8 {
        match self {
            DeliveryState::Error(_) => 0,
            DeliveryState::Sending => 1,
            DeliveryState::Sent => 2,
            DeliveryState::Delivered => 3,
        }
    }

    /// Whether this state represents a failed send
    pub fn is_error(&self) -> bool {
        matches!(self, DeliveryState::Error(_))
    }
}

impl core::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DeliveryState::Sending => write!(f, "sending"),
            DeliveryState::Sent => write!(f, "sent"),
            DeliveryState::Delivered => write!(f, "delivered"),
            DeliveryState::Error(failure) => write!(f, "error({})", failure.code),
        }
    }
}

// ----------------------------------------------------------------------------
// Message Record
// ----------------------------------------------------------------------------

/// One message in a session's ordered log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Current identity: a client-minted id until the server names the
    /// message, the server-assigned id afterwards
    pub id: MessageId,
    /// Server-assigned identifier, once known
    pub server_id: Option<MessageId>,
    /// Session this message belongs to; `None` only for an optimistic send
    /// racing the very first engagement response
    pub session_id: Option<SessionId>,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: Timestamp,
    /// Server turn index, once known
    pub turn: Option<u32>,
    pub delivery: DeliveryState,
    /// Entities extracted from this message, if any
    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl Message {
    /// Create an optimistic local record with a fresh client identifier
    pub fn optimistic(
        session_id: Option<SessionId>,
        role: MessageRole,
        content: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: MessageId::random(),
            server_id: None,
            session_id,
            role,
            content: content.into(),
            timestamp,
            turn: None,
            delivery: DeliveryState::Sending,
            entities: Vec::new(),
        }
    }

    /// Create a server-confirmed record (history hydration or live event)
    pub fn confirmed(
        server_id: MessageId,
        session_id: SessionId,
        role: MessageRole,
        content: impl Into<String>,
        timestamp: Timestamp,
        turn: Option<u32>,
    ) -> Self {
        Self {
            id: server_id.clone(),
            server_id: Some(server_id),
            session_id: Some(session_id),
            role,
            content: content.into(),
            timestamp,
            turn,
            delivery: DeliveryState::Delivered,
            entities: Vec::new(),
        }
    }

    /// Create a server-authored record relayed without a server identifier
    ///
    /// Request/response payloads carry content and turn but no message id;
    /// the id arrives later on the live channel and is adopted by merge.
    pub fn relayed(
        session_id: SessionId,
        role: MessageRole,
        content: impl Into<String>,
        timestamp: Timestamp,
        turn: Option<u32>,
    ) -> Self {
        Self {
            id: MessageId::random(),
            server_id: None,
            session_id: Some(session_id),
            role,
            content: content.into(),
            timestamp,
            turn,
            delivery: DeliveryState::Delivered,
            entities: Vec::new(),
        }
    }

    /// Whether the server has assigned this record its identity
    pub fn has_server_id(&self) -> bool {
        self.server_id.is_some()
    }

    /// Mark this record as a failed send
    pub fn mark_failed(&mut self, failure: SendFailure) {
        self.delivery = DeliveryState::Error(failure);
    }
}

// ----------------------------------------------------------------------------
// Message Patch
// ----------------------------------------------------------------------------

/// Partial update applied to an existing message record by id
///
/// Unset fields leave the record untouched.
#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    pub delivery: Option<DeliveryState>,
    pub server_id: Option<MessageId>,
    pub session_id: Option<SessionId>,
    pub turn: Option<u32>,
    pub timestamp: Option<Timestamp>,
}

impl MessagePatch {
    /// Patch that only changes delivery status
    pub fn delivery(delivery: DeliveryState) -> Self {
        Self {
            delivery: Some(delivery),
            ..Default::default()
        }
    }

    /// Apply this patch to a record in place
    pub fn apply_to(&self, message: &mut Message) {
        if let Some(delivery) = &self.delivery {
            message.delivery = delivery.clone();
        }
        if let Some(server_id) = &self.server_id {
            message.server_id = Some(server_id.clone());
            message.id = server_id.clone();
        }
        if let Some(session_id) = &self.session_id {
            message.session_id = Some(session_id.clone());
        }
        if let Some(turn) = self.turn {
            message.turn = Some(turn);
        }
        if let Some(timestamp) = self.timestamp {
            message.timestamp = timestamp;
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
