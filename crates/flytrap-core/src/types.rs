//! Core types for the Flytrap engagement client
//!
//! This module defines the fundamental identifier and time types used
//! throughout the client, using newtype patterns for semantic validation
//! and type safety.

use core::fmt;
use core::ops::{Add, Sub};
use core::str::FromStr;
use core::time::Duration;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Session Identifier
// ----------------------------------------------------------------------------

/// Opaque identifier for an engagement session, assigned by the server
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new SessionId from any string-like value
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl FromStr for SessionId {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

// ----------------------------------------------------------------------------
// Message Identifier
// ----------------------------------------------------------------------------

/// Identifier for one message record in a session log
///
/// Optimistic local sends mint a random identifier; reconciliation replaces
/// it with the server-assigned identifier once the send is confirmed. Both
/// forms are opaque strings and unique within a session.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Create a MessageId from a known (server-assigned) identifier
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Mint a fresh client-side identifier for an optimistic message
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a new timestamp from raw milliseconds
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Get the current wall-clock timestamp
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Add seconds to this timestamp
    pub fn add_seconds(&self, seconds: u64) -> Self {
        Self(self.0 + (seconds * 1000))
    }

    /// Get duration since another timestamp (zero if `other` is later)
    pub fn duration_since(&self, other: Self) -> Duration {
        let millis_diff = self.0.saturating_sub(other.0);
        Duration::from_millis(millis_diff)
    }

    /// Absolute difference between two timestamps
    pub fn abs_diff(&self, other: Self) -> Duration {
        Duration::from_millis(self.0.abs_diff(other.0))
    }
}

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: u64) -> Timestamp {
        Timestamp(self.0 + other)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: Duration) -> Timestamp {
        Timestamp(self.0 + other.as_millis() as u64)
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Time Source Trait
// ----------------------------------------------------------------------------

/// Trait for providing timestamps without reaching for the wall clock
///
/// Optimistic message stamping and reconciliation tolerance checks go
/// through this trait so tests can drive time deterministically.
pub trait TimeSource: Send + Sync {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// Standard wall-clock implementation of TimeSource
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_roundtrip() {
        let id = SessionId::new("sess-42");
        assert_eq!(id.as_str(), "sess-42");
        assert_eq!(id.to_string(), "sess-42");
        assert_eq!(SessionId::from("sess-42"), id);
    }

    #[test]
    fn test_message_id_random_is_unique() {
        let a = MessageId::random();
        let b = MessageId::random();
        assert_ne!(a, b);
        assert!(!a.as_str().is_empty());
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let base = Timestamp::new(10_000);
        assert_eq!(base.as_millis(), 10_000);
        assert_eq!((base + 500u64).as_millis(), 10_500);
        assert_eq!(base.add_seconds(2).as_millis(), 12_000);
        assert_eq!((base + Duration::from_millis(250)).as_millis(), 10_250);
    }

    #[test]
    fn test_timestamp_difference_saturates() {
        let early = Timestamp::new(1_000);
        let late = Timestamp::new(4_000);
        assert_eq!(late - early, 3_000);
        assert_eq!(early - late, 0);
        assert_eq!(late.duration_since(early), Duration::from_millis(3_000));
        assert_eq!(early.duration_since(late), Duration::ZERO);
        assert_eq!(early.abs_diff(late), Duration::from_millis(3_000));
        assert_eq!(late.abs_diff(early), Duration::from_millis(3_000));
    }

    #[test]
    fn test_system_time_source_advances() {
        let source = SystemTimeSource::new();
        let t = source.now();
        assert!(t.as_millis() > 0);
    }
}
