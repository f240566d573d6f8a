//! Engagement session metadata
//!
//! A session is one end-to-end scam engagement: lifecycle status, the
//! persona the agent speaks through, the detected scam classification, and
//! an accumulated turn count. The server owns the truth; the client holds
//! at most one active session at a time.

use serde::{Deserialize, Serialize};

use crate::types::{SessionId, Timestamp};

// ----------------------------------------------------------------------------
// Session Status
// ----------------------------------------------------------------------------

/// Lifecycle status of an engagement session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Created, no turns exchanged yet
    Initial,
    /// Actively exchanging turns
    Ongoing,
    /// Ended normally
    Completed,
    /// Ended by explicit operator termination
    Terminated,
    /// Ended by hitting the configured turn ceiling
    MaxTurnsReached,
    /// Ended by the agent's safety monitor
    SafetyExit,
}

impl SessionStatus {
    /// Whether the session can still accept turns
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Initial | SessionStatus::Ongoing)
    }

    /// Stable wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Initial => "INITIAL",
            SessionStatus::Ongoing => "ONGOING",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Terminated => "TERMINATED",
            SessionStatus::MaxTurnsReached => "MAX_TURNS_REACHED",
            SessionStatus::SafetyExit => "SAFETY_EXIT",
        }
    }
}

impl core::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Risk Level
// ----------------------------------------------------------------------------

/// Assessed risk level of the engagement
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Derive a risk level from a scam-classification confidence score
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= 0.8 {
            RiskLevel::Critical
        } else if confidence >= 0.6 {
            RiskLevel::High
        } else if confidence >= 0.4 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Stable wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

impl core::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

/// Metadata for one engagement session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub status: SessionStatus,
    /// Persona the agent is speaking through, once assigned
    pub persona: Option<String>,
    /// Detected scam classification, once known
    pub scam_type: Option<String>,
    /// Confidence of the scam classification in `[0.0, 1.0]`
    pub confidence: Option<f32>,
    pub risk_level: Option<RiskLevel>,
    /// Number of exchange turns completed; never decreases
    pub turn_count: u32,
    /// Server hint that the engagement is about to end
    #[serde(default)]
    pub winding_down: bool,
    pub started_at: Timestamp,
}

impl Session {
    /// Create a freshly started session
    pub fn new(id: SessionId, started_at: Timestamp) -> Self {
        Self {
            id,
            status: SessionStatus::Initial,
            persona: None,
            scam_type: None,
            confidence: None,
            risk_level: None,
            turn_count: 0,
            winding_down: false,
            started_at,
        }
    }
}

// ----------------------------------------------------------------------------
// Session Patch
// ----------------------------------------------------------------------------

/// Partial metadata update; unset fields are left untouched
///
/// The store applies the turn-count monotonicity rule when merging, so a
/// patch carrying a stale (lower) turn count cannot move the session
/// backwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub persona: Option<String>,
    pub scam_type: Option<String>,
    pub confidence: Option<f32>,
    pub risk_level: Option<RiskLevel>,
    pub turn_count: Option<u32>,
    pub winding_down: Option<bool>,
}

impl SessionPatch {
    /// Patch that only advances the turn count
    pub fn turns(turn_count: u32) -> Self {
        Self {
            turn_count: Some(turn_count),
            ..Default::default()
        }
    }

    /// Patch that only changes the status
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Whether this patch carries no changes at all
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.persona.is_none()
            && self.scam_type.is_none()
            && self.confidence.is_none()
            && self.risk_level.is_none()
            && self.turn_count.is_none()
            && self.winding_down.is_none()
    }
}

// ----------------------------------------------------------------------------
// Session Summary
// ----------------------------------------------------------------------------

/// Wrap-up returned by the server when a session ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_turns: u32,
    pub entities_extracted: u32,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
