//! Message reconciliation
//!
//! Three sources feed one log: optimistic local sends, one-shot history
//! hydration, and live transport events. The request/response channel and
//! the live channel race, so arrival order proves nothing; these pure
//! functions decide when two records describe the same logical message and
//! how to collapse them into one.
//!
//! Identity rule: two records with server-assigned identifiers are the same
//! message iff those identifiers are equal. A record without a server
//! identifier (an optimistic send) matches a server-confirmed record when
//! session, role, and content agree and the timestamps fall within a
//! tolerance window. Two unconfirmed records never content-match each
//! other: a user really can send the same text twice.

use core::time::Duration;

use crate::message::{DeliveryState, Message};

// ----------------------------------------------------------------------------
// Identity
// ----------------------------------------------------------------------------

/// Whether two records describe the same logical message
pub fn same_message(a: &Message, b: &Message, tolerance: Duration) -> bool {
    match (&a.server_id, &b.server_id) {
        (Some(sa), Some(sb)) => sa == sb,
        (None, None) => a.id == b.id,
        // one side is optimistic, the other confirmed
        _ => {
            sessions_compatible(a, b)
                && a.role == b.role
                && a.content == b.content
                && a.timestamp.abs_diff(b.timestamp) <= tolerance
        }
    }
}

/// Session agreement for the content-identity rule
///
/// An optimistic record racing the first engagement response has no session
/// yet; it is compatible with any confirmed record the store is willing to
/// hold (the store only ever holds the active session).
fn sessions_compatible(a: &Message, b: &Message) -> bool {
    match (&a.session_id, &b.session_id) {
        (Some(sa), Some(sb)) => sa == sb,
        _ => true,
    }
}

/// Find the log position of a record matching `candidate`, if any
pub fn find_match(log: &[Message], candidate: &Message, tolerance: Duration) -> Option<usize> {
    log.iter()
        .position(|existing| same_message(existing, candidate, tolerance))
}

// ----------------------------------------------------------------------------
// Merge
// ----------------------------------------------------------------------------

/// Collapse two records for the same logical message into one
///
/// Confirmation wins: server identity, timestamp, and turn replace the
/// optimistic placeholders. Content is only replaced by a record strictly
/// newer by turn index. Delivery status moves forward only, which also
/// means a confirmation clears an error state.
pub fn merge(existing: &Message, incoming: &Message) -> Message {
    let mut merged = existing.clone();

    if let Some(server_id) = &incoming.server_id {
        merged.server_id = Some(server_id.clone());
        merged.id = server_id.clone();
    }
    if merged.session_id.is_none() {
        merged.session_id = incoming.session_id.clone();
    }

    merged.turn = match (existing.turn, incoming.turn) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };

    // the confirmed side owns the authoritative timestamp
    if incoming.has_server_id() {
        merged.timestamp = incoming.timestamp;
    }

    if incoming_strictly_newer(existing, incoming) {
        merged.content = incoming.content.clone();
    }

    merged.delivery = forward_delivery(&existing.delivery, &incoming.delivery);

    for entity in &incoming.entities {
        let seen = merged
            .entities
            .iter()
            .any(|e| e.dedup_key() == entity.dedup_key());
        if !seen {
            merged.entities.push(entity.clone());
        }
    }

    merged
}

fn incoming_strictly_newer(existing: &Message, incoming: &Message) -> bool {
    match (existing.turn, incoming.turn) {
        (Some(a), Some(b)) => b > a,
        _ => false,
    }
}

fn forward_delivery(existing: &DeliveryState, incoming: &DeliveryState) -> DeliveryState {
    if incoming.rank() > existing.rank() {
        incoming.clone()
    } else {
        existing.clone()
    }
}

// ----------------------------------------------------------------------------
// Ordering
// ----------------------------------------------------------------------------

/// Whether a confirmed arrival breaks the expected turn progression
///
/// Two records legitimately share one turn (the scammer message and the
/// agent's reply), so only a backward step or a gap counts as out of
/// order. Records without a turn index are never flagged.
pub fn is_out_of_order(current_max_turn: Option<u32>, incoming_turn: Option<u32>) -> bool {
    match (current_max_turn, incoming_turn) {
        (Some(max), Some(turn)) => turn < max || turn > max + 1,
        (None, Some(turn)) => turn > 1,
        _ => false,
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
