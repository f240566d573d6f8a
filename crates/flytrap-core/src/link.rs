//! Connection link state and reconnect policy
//!
//! The transport shell owns the socket; this module owns the semantics:
//! the observable [`LinkState`] and the [`Reconnector`] policy that decides
//! whether a dropped connection gets another attempt. Keeping the policy
//! free of I/O lets the reconnect budget be tested exhaustively without a
//! network.
//!
//! State machine:
//! `Disconnected -connect-> Connecting -open-> Connected -drop->
//! Reconnecting* -budget exhausted-> Disconnected`.
//! `Reconnecting` re-enters `Connecting` after one fixed delay per attempt.

use core::time::Duration;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Link State
// ----------------------------------------------------------------------------

/// Observable state of the real-time connection
///
/// Owned exclusively by the transport; every other component reads it
/// through a watch channel and never writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// No connection and no attempts in progress
    Disconnected,
    /// First connection attempt in progress
    Connecting,
    /// Connection open; frames flow
    Connected,
    /// Connection lost; waiting out the fixed delay before attempt `attempt`
    Reconnecting { attempt: u32 },
}

impl LinkState {
    /// Whether frames can be sent right now
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected)
    }

    /// Whether an attempt is in progress or scheduled
    pub fn is_busy(&self) -> bool {
        matches!(self, LinkState::Connecting | LinkState::Reconnecting { .. })
    }

    /// Short name for logs and status lines
    pub fn name(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Reconnecting { .. } => "reconnecting",
        }
    }
}

impl core::fmt::Display for LinkState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LinkState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            other => write!(f, "{}", other.name()),
        }
    }
}

// ----------------------------------------------------------------------------
// Reconnect Policy
// ----------------------------------------------------------------------------

/// Verdict for one reconnect request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Wait `delay`, then make attempt number `attempt`
    Retry { attempt: u32, delay: Duration },
    /// Budget exhausted; the link is terminally down until an explicit
    /// connect is requested again
    GiveUp,
}

/// Fixed-delay, bounded-attempt reconnect policy
///
/// Each drop of an established connection opens a fresh budget of
/// `max_attempts` attempts, spaced by one fixed delay. A successful
/// connection resets the counter.
#[derive(Debug, Clone)]
pub struct Reconnector {
    delay: Duration,
    max_attempts: u32,
    attempts_made: u32,
}

impl Reconnector {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
            attempts_made: 0,
        }
    }

    /// Record a successful connection, resetting the attempt budget
    pub fn connected(&mut self) {
        self.attempts_made = 0;
    }

    /// Ask for the next attempt after a failure or drop
    pub fn next_attempt(&mut self) -> ReconnectDecision {
        if self.attempts_made >= self.max_attempts {
            return ReconnectDecision::GiveUp;
        }
        self.attempts_made += 1;
        ReconnectDecision::Retry {
            attempt: self.attempts_made,
            delay: self.delay,
        }
    }

    /// Attempts consumed from the current budget
    pub fn attempts_made(&self) -> u32 {
        self.attempts_made
    }

    /// Whether the current budget is spent
    pub fn is_exhausted(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_state_predicates() {
        assert!(LinkState::Connected.is_connected());
        assert!(!LinkState::Connecting.is_connected());
        assert!(LinkState::Connecting.is_busy());
        assert!(LinkState::Reconnecting { attempt: 2 }.is_busy());
        assert!(!LinkState::Disconnected.is_busy());
        assert!(!LinkState::Connected.is_busy());
    }

    #[test]
    fn test_reconnector_yields_exactly_max_retries_then_gives_up() {
        let mut reconnector = Reconnector::new(Duration::from_millis(10), 3);

        for expected in 1..=3 {
            match reconnector.next_attempt() {
                ReconnectDecision::Retry { attempt, delay } => {
                    assert_eq!(attempt, expected);
                    assert_eq!(delay, Duration::from_millis(10));
                }
                ReconnectDecision::GiveUp => panic!("gave up after {expected} attempts"),
            }
        }

        assert!(reconnector.is_exhausted());
        assert_eq!(reconnector.next_attempt(), ReconnectDecision::GiveUp);
        // asking again changes nothing
        assert_eq!(reconnector.next_attempt(), ReconnectDecision::GiveUp);
        assert_eq!(reconnector.attempts_made(), 3);
    }

    #[test]
    fn test_successful_connection_resets_budget() {
        let mut reconnector = Reconnector::new(Duration::from_millis(10), 2);

        assert!(matches!(
            reconnector.next_attempt(),
            ReconnectDecision::Retry { attempt: 1, .. }
        ));
        assert!(matches!(
            reconnector.next_attempt(),
            ReconnectDecision::Retry { attempt: 2, .. }
        ));
        assert_eq!(reconnector.next_attempt(), ReconnectDecision::GiveUp);

        reconnector.connected();
        assert_eq!(reconnector.attempts_made(), 0);
        assert!(matches!(
            reconnector.next_attempt(),
            ReconnectDecision::Retry { attempt: 1, .. }
        ));
    }

    #[test]
    fn test_zero_budget_gives_up_immediately() {
        let mut reconnector = Reconnector::new(Duration::from_millis(10), 0);
        assert_eq!(reconnector.next_attempt(), ReconnectDecision::GiveUp);
    }

    #[test]
    fn test_delay_is_fixed_across_attempts() {
        let mut reconnector = Reconnector::new(Duration::from_secs(3), 5);
        let mut delays = Vec::new();
        while let ReconnectDecision::Retry { delay, .. } = reconnector.next_attempt() {
            delays.push(delay);
        }
        assert_eq!(delays.len(), 5);
        assert!(delays.iter().all(|d| *d == Duration::from_secs(3)));
    }
}
