//! Active-session store
//!
//! Owns the client's view of exactly one engagement session: the session
//! record, the ordered message log, and the extracted-entity set. All
//! mutation goes through the operations here, which route every incoming
//! record through the reconciler so the log stays duplicate-free and
//! ordered by turn no matter which channel delivered the record first.
//!
//! The store is plain synchronous state. Callers that share it across
//! tasks wrap it in a mutex and keep the critical sections short.

use tracing::{debug, warn};

use crate::config::{ReconcileConfig, StoreConfig};
use crate::intel::Entity;
use crate::message::{DeliveryState, Message, MessagePatch};
use crate::reconcile;
use crate::session::{Session, SessionPatch, SessionSummary};
use crate::types::{MessageId, SessionId};

// ----------------------------------------------------------------------------
// Outcomes and Stats
// ----------------------------------------------------------------------------

/// What `append_or_merge` did with an incoming record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// New record inserted into the log
    Appended,
    /// Collapsed into an existing record, changing it
    Merged,
    /// Collapsed into an existing record without changing anything
    Duplicate,
    /// Belongs to a session other than the active one
    Rejected,
}

/// Counters for store activity, kept for the lifetime of the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub appended: u64,
    pub merged: u64,
    pub duplicates: u64,
    pub rejected: u64,
    /// Confirmed appends whose turn index broke the expected progression
    pub out_of_order: u64,
    /// Session meta updates that tried to move the turn count backwards
    pub turn_regressions: u64,
    pub entities_deduped: u64,
    pub evicted: u64,
}

// ----------------------------------------------------------------------------
// Session Store
// ----------------------------------------------------------------------------

/// Client-side state for the active engagement session
#[derive(Debug)]
pub struct SessionStore {
    config: StoreConfig,
    reconcile: ReconcileConfig,
    session: Option<Session>,
    messages: Vec<Message>,
    entities: Vec<Entity>,
    stats: StoreStats,
}

/// Log position key: turn first, timestamp second; unindexed records
/// (optimistic sends) sort after everything confirmed
fn sort_key(message: &Message) -> (u32, u64) {
    (
        message.turn.unwrap_or(u32::MAX),
        message.timestamp.as_millis(),
    )
}

impl SessionStore {
    pub fn new(config: StoreConfig, reconcile: ReconcileConfig) -> Self {
        Self {
            config,
            reconcile,
            session: None,
            messages: Vec::new(),
            entities: Vec::new(),
            stats: StoreStats::default(),
        }
    }

    // ------------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------------

    /// Replace the active session and its log wholesale
    ///
    /// Used when a session starts or when history hydration completes. Any
    /// previous session's state is discarded; entities carried by the new
    /// history are harvested into the entity set.
    pub fn set_active_session(&mut self, session: Session, history: Vec<Message>) {
        debug!(session_id = %session.id, messages = history.len(), "activating session");
        self.session = Some(session);
        self.messages = history;
        self.messages.sort_by_key(sort_key);
        self.entities.clear();
        let carried: Vec<Entity> = self
            .messages
            .iter()
            .flat_map(|m| m.entities.iter().cloned())
            .collect();
        self.add_entities(carried);
    }

    /// Bind a newly started session without touching the log
    ///
    /// The optimistic first send is already in the log when the engagement
    /// response names its session; hydration-style replacement would drop
    /// that record.
    pub fn activate_session(&mut self, session: Session) {
        debug!(session_id = %session.id, "binding session");
        self.session = Some(session);
    }

    /// Drop all session state
    ///
    /// Safe to call at any time, including with nothing active.
    pub fn clear(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(session_id = %session.id, "clearing session state");
        }
        self.messages.clear();
        self.entities.clear();
    }

    // ------------------------------------------------------------------------
    // Message log
    // ------------------------------------------------------------------------

    /// Insert a record, or collapse it into an existing one
    ///
    /// The log stays ordered by turn and free of duplicates regardless of
    /// which channel delivered the record first. Confirmed records whose
    /// turn breaks the expected progression are accepted and counted, never
    /// held back. Records tagged with any session other than the active one
    /// are dropped.
    pub fn append_or_merge(&mut self, incoming: Message) -> AppendOutcome {
        match (&self.session, &incoming.session_id) {
            (Some(session), Some(session_id)) if &session.id != session_id => {
                warn!(
                    active = %session.id,
                    incoming = %session_id,
                    "dropping message for inactive session"
                );
                self.stats.rejected += 1;
                return AppendOutcome::Rejected;
            }
            // a session-tagged record with nothing active is a late arrival
            // for a session that already ended
            (None, Some(session_id)) => {
                warn!(incoming = %session_id, "dropping message, no active session");
                self.stats.rejected += 1;
                return AppendOutcome::Rejected;
            }
            _ => {}
        }

        let tolerance = self.reconcile.timestamp_tolerance;
        if let Some(idx) = reconcile::find_match(&self.messages, &incoming, tolerance) {
            let merged = reconcile::merge(&self.messages[idx], &incoming);
            if merged == self.messages[idx] {
                self.stats.duplicates += 1;
                debug!(id = %incoming.id, "duplicate record ignored");
                return AppendOutcome::Duplicate;
            }
            self.messages[idx] = merged;
            self.restore_order(idx);
            self.add_entities(incoming.entities);
            self.stats.merged += 1;
            return AppendOutcome::Merged;
        }

        if incoming.has_server_id()
            && reconcile::is_out_of_order(self.max_turn(), incoming.turn)
        {
            self.stats.out_of_order += 1;
            warn!(
                turn = ?incoming.turn,
                max_turn = ?self.max_turn(),
                "accepted message with out-of-order turn"
            );
        }

        let carried = incoming.entities.clone();
        let pos = self
            .messages
            .partition_point(|m| sort_key(m) <= sort_key(&incoming));
        self.messages.insert(pos, incoming);
        self.stats.appended += 1;
        self.add_entities(carried);
        self.evict_overflow();
        AppendOutcome::Appended
    }

    /// Apply a partial update to a record found by client or server id
    ///
    /// Returns false (and changes nothing) when no record matches.
    pub fn update_message(&mut self, id: &MessageId, patch: MessagePatch) -> bool {
        let Some(idx) = self.position_of(id) else {
            debug!(%id, "update for unknown message ignored");
            return false;
        };
        patch.apply_to(&mut self.messages[idx]);
        self.restore_order(idx);
        true
    }

    /// Remove a record by client or server id, returning it
    pub fn remove_message(&mut self, id: &MessageId) -> Option<Message> {
        let idx = self.position_of(id)?;
        Some(self.messages.remove(idx))
    }

    fn position_of(&self, id: &MessageId) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| &m.id == id || m.server_id.as_ref() == Some(id))
    }

    /// Move a record back into key order after a merge or patch changed
    /// its turn or timestamp
    fn restore_order(&mut self, idx: usize) {
        let key = sort_key(&self.messages[idx]);
        let before = idx > 0 && sort_key(&self.messages[idx - 1]) > key;
        let after = idx + 1 < self.messages.len() && key > sort_key(&self.messages[idx + 1]);
        if before || after {
            let message = self.messages.remove(idx);
            let pos = self
                .messages
                .partition_point(|m| sort_key(m) <= sort_key(&message));
            self.messages.insert(pos, message);
        }
    }

    /// Drop the oldest confirmed records while over capacity
    ///
    /// Records still sending or in error are never evicted; if the front of
    /// the log is one of those, the cap is allowed to overshoot.
    fn evict_overflow(&mut self) {
        while self.messages.len() > self.config.max_messages {
            let front_evictable = self
                .messages
                .first()
                .map(|m| !matches!(m.delivery, DeliveryState::Sending | DeliveryState::Error(_)))
                .unwrap_or(false);
            if !front_evictable {
                break;
            }
            self.messages.remove(0);
            self.stats.evicted += 1;
        }
    }

    // ------------------------------------------------------------------------
    // Session meta and entities
    // ------------------------------------------------------------------------

    /// Merge partial session fields into the active session
    ///
    /// Ignored when nothing is active. The turn count never moves backwards;
    /// a regressing update is dropped and counted.
    pub fn update_session_meta(&mut self, patch: SessionPatch) {
        let Some(session) = self.session.as_mut() else {
            debug!("session update with no active session ignored");
            return;
        };
        if patch.is_empty() {
            return;
        }
        if let Some(status) = patch.status {
            session.status = status;
        }
        if let Some(persona) = patch.persona {
            session.persona = Some(persona);
        }
        if let Some(scam_type) = patch.scam_type {
            session.scam_type = Some(scam_type);
        }
        if let Some(confidence) = patch.confidence {
            session.confidence = Some(confidence);
        }
        if let Some(risk_level) = patch.risk_level {
            session.risk_level = Some(risk_level);
        }
        if let Some(winding_down) = patch.winding_down {
            session.winding_down = winding_down;
        }
        if let Some(turns) = patch.turn_count {
            if turns < session.turn_count {
                self.stats.turn_regressions += 1;
                warn!(
                    current = session.turn_count,
                    incoming = turns,
                    "ignoring backwards turn count"
                );
            } else {
                session.turn_count = turns;
            }
        }
    }

    /// Add extracted entities, deduplicating by kind and value
    ///
    /// Returns how many were actually new.
    pub fn add_entities<I>(&mut self, batch: I) -> usize
    where
        I: IntoIterator<Item = Entity>,
    {
        let mut added = 0;
        for entity in batch {
            let seen = self
                .entities
                .iter()
                .any(|e| e.dedup_key() == entity.dedup_key());
            if seen {
                self.stats.entities_deduped += 1;
            } else {
                self.entities.push(entity);
                added += 1;
            }
        }
        added
    }

    // ------------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------------

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn active_session_id(&self) -> Option<&SessionId> {
        self.session.as_ref().map(|s| &s.id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.position_of(id).map(|idx| &self.messages[idx])
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Highest confirmed turn index in the log
    pub fn max_turn(&self) -> Option<u32> {
        self.messages.iter().filter_map(|m| m.turn).max()
    }

    /// Whether the log already holds history for the given session
    ///
    /// Hydration is one-shot: a resume against a session that is active and
    /// non-empty must not refetch.
    pub fn is_hydrated_for(&self, session_id: &SessionId) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| &s.id == session_id)
            && !self.messages.is_empty()
    }

    /// Summary derived from local state, used when the server cannot
    /// provide one at session end
    pub fn local_summary(&self) -> SessionSummary {
        let total_turns = self
            .session
            .as_ref()
            .map(|s| s.turn_count)
            .unwrap_or(0)
            .max(self.max_turn().unwrap_or(0));
        SessionSummary {
            total_turns,
            entities_extracted: self.entities.len() as u32,
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(StoreConfig::default(), ReconcileConfig::default())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
