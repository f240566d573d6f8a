//! End-to-end reconciliation flows over the session store
//!
//! Exercises the store and reconciler together across the delivery races
//! the client actually sees: the request/response confirmation and the
//! live event for the same message arriving in either order, history
//! hydration racing live traffic, replays, and late arrivals after the
//! session has ended.

use flytrap_core::{
    AppendOutcome, DeliveryState, Message, MessageId, MessagePatch, MessageRole, ReconcileConfig,
    SendFailure, Session, SessionId, SessionPatch, SessionStatus, SessionStore, StoreConfig,
    Timestamp,
};

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

fn store() -> SessionStore {
    SessionStore::new(StoreConfig::default(), ReconcileConfig::default())
}

fn session(id: &str) -> Session {
    Session::new(SessionId::new(id), Timestamp::new(0))
}

fn live(id: &str, role: MessageRole, content: &str, ts: u64, turn: u32) -> Message {
    Message::confirmed(
        MessageId::new(id),
        SessionId::new("s1"),
        role,
        content,
        Timestamp::new(ts),
        Some(turn),
    )
}

// ----------------------------------------------------------------------------
// Cold Start
// ----------------------------------------------------------------------------

#[test]
fn cold_start_send_confirm_then_live_echoes() {
    let mut store = store();

    // operator hits send before any session exists
    let draft = Message::optimistic(None, MessageRole::Scammer, "hello ji", Timestamp::new(10_000));
    let draft_id = draft.id.clone();
    assert_eq!(store.append_or_merge(draft), AppendOutcome::Appended);

    // engagement response: session named, turn assigned, agent replied
    store.activate_session(session("s1"));
    let confirm = MessagePatch {
        delivery: Some(DeliveryState::Sent),
        session_id: Some(SessionId::new("s1")),
        turn: Some(1),
        ..Default::default()
    };
    assert!(store.update_message(&draft_id, confirm));
    let reply = Message::relayed(
        SessionId::new("s1"),
        MessageRole::Victim,
        "haan beta, tell me",
        Timestamp::new(11_000),
        Some(1),
    );
    assert_eq!(store.append_or_merge(reply), AppendOutcome::Appended);

    // live channel echoes both messages with their server identities
    let scammer_echo = live("m1", MessageRole::Scammer, "hello ji", 10_400, 1);
    let victim_echo = live("m2", MessageRole::Victim, "haan beta, tell me", 11_200, 1);
    assert_eq!(store.append_or_merge(scammer_echo), AppendOutcome::Merged);
    assert_eq!(store.append_or_merge(victim_echo), AppendOutcome::Merged);

    // one record per logical message, both delivered under server identity
    let log = store.messages();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].id, MessageId::new("m1"));
    assert_eq!(log[0].role, MessageRole::Scammer);
    assert_eq!(log[0].delivery, DeliveryState::Delivered);
    assert_eq!(log[1].id, MessageId::new("m2"));
    assert_eq!(log[1].role, MessageRole::Victim);
    assert_eq!(log[1].delivery, DeliveryState::Delivered);
}

#[test]
fn live_echo_beats_the_send_confirmation() {
    let mut store = store();
    store.activate_session(session("s1"));

    let draft = Message::optimistic(
        Some(SessionId::new("s1")),
        MessageRole::Scammer,
        "send the otp",
        Timestamp::new(20_000),
    );
    let draft_id = draft.id.clone();
    store.append_or_merge(draft);

    // live echo lands first and takes over the record's identity
    let echo = live("m9", MessageRole::Scammer, "send the otp", 20_300, 3);
    assert_eq!(store.append_or_merge(echo), AppendOutcome::Merged);

    // the request/response confirmation now addresses a record that has
    // moved on; the stale patch must hit nothing
    let stale = MessagePatch {
        delivery: Some(DeliveryState::Sent),
        turn: Some(3),
        ..Default::default()
    };
    assert!(!store.update_message(&draft_id, stale));

    let log = store.messages();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].id, MessageId::new("m9"));
    assert_eq!(log[0].delivery, DeliveryState::Delivered);
}

// ----------------------------------------------------------------------------
// Resume and Live Continuation
// ----------------------------------------------------------------------------

#[test]
fn hydrated_history_absorbs_replays_and_continues() {
    let mut store = store();
    let history = vec![
        live("m1", MessageRole::Scammer, "hello", 1_000, 1),
        live("m2", MessageRole::Victim, "hello beta", 2_000, 1),
        live("m3", MessageRole::Scammer, "your account is blocked", 3_000, 2),
    ];
    store.set_active_session(session("s1"), history);
    assert!(store.is_hydrated_for(&SessionId::new("s1")));

    // the live channel replays the newest history record
    let replay = live("m3", MessageRole::Scammer, "your account is blocked", 3_000, 2);
    assert_eq!(store.append_or_merge(replay), AppendOutcome::Duplicate);

    // then the conversation continues
    let next = live("m4", MessageRole::Victim, "oh no, what do I do?", 4_000, 2);
    assert_eq!(store.append_or_merge(next), AppendOutcome::Appended);

    // a gap in the turn sequence is let through and counted
    let skipped = live("m6", MessageRole::Victim, "which branch?", 6_000, 4);
    assert_eq!(store.append_or_merge(skipped), AppendOutcome::Appended);
    assert_eq!(store.stats().out_of_order, 1);

    let turns: Vec<_> = store.messages().iter().filter_map(|m| m.turn).collect();
    assert_eq!(turns, vec![1, 1, 2, 2, 4]);
    assert_eq!(store.stats().duplicates, 1);
}

#[test]
fn meta_updates_merge_and_never_roll_turns_back() {
    let mut store = store();
    store.set_active_session(session("s1"), Vec::new());

    store.update_session_meta(SessionPatch {
        status: Some(SessionStatus::Ongoing),
        turn_count: Some(4),
        ..Default::default()
    });
    // a delayed update from an earlier turn
    store.update_session_meta(SessionPatch::turns(2));

    let active = store.session().cloned().expect("session is active");
    assert_eq!(active.status, SessionStatus::Ongoing);
    assert_eq!(active.turn_count, 4);
    assert_eq!(store.stats().turn_regressions, 1);
}

// ----------------------------------------------------------------------------
// Failure and Retry
// ----------------------------------------------------------------------------

#[test]
fn failed_send_stays_visible_until_retried() {
    let mut store = store();
    store.activate_session(session("s1"));

    let draft = Message::optimistic(
        Some(SessionId::new("s1")),
        MessageRole::Scammer,
        "share your upi pin",
        Timestamp::new(30_000),
    );
    let draft_id = draft.id.clone();
    store.append_or_merge(draft);

    // the send request fails; the record flips to error but stays put
    let failure = SendFailure::send_failed("engage request returned 500");
    assert!(store.update_message(
        &draft_id,
        MessagePatch::delivery(DeliveryState::Error(failure))
    ));
    let record = store.message(&draft_id).expect("record still in log");
    assert!(record.delivery.is_error());

    // retry removes the failed record and sends the same content fresh
    let failed = store.remove_message(&draft_id).expect("removable");
    let retry = Message::optimistic(
        failed.session_id.clone(),
        failed.role,
        failed.content.clone(),
        Timestamp::new(31_000),
    );
    let retry_id = retry.id.clone();
    assert_eq!(store.append_or_merge(retry), AppendOutcome::Appended);
    assert_eq!(store.messages().len(), 1);

    // and the eventual echo confirms the retry
    let echo = live("m1", MessageRole::Scammer, "share your upi pin", 31_200, 5);
    assert_eq!(store.append_or_merge(echo), AppendOutcome::Merged);
    assert!(store.message(&retry_id).is_none());
    assert_eq!(
        store.message(&MessageId::new("m1")).map(|m| &m.delivery),
        Some(&DeliveryState::Delivered)
    );
}

// ----------------------------------------------------------------------------
// Session End
// ----------------------------------------------------------------------------

#[test]
fn cleanup_comes_first_and_late_events_bounce() {
    let mut store = store();
    store.set_active_session(
        session("s1"),
        vec![
            live("m1", MessageRole::Scammer, "hello", 1_000, 1),
            live("m2", MessageRole::Victim, "hello beta", 2_000, 1),
        ],
    );
    store.update_session_meta(SessionPatch::turns(1));

    let summary = store.local_summary();
    assert_eq!(summary.total_turns, 1);

    store.clear();
    assert!(store.session().is_none());
    assert!(store.is_empty());

    // result of the end request arriving late changes nothing
    store.clear();

    // live traffic for the dead session is dropped
    let late = live("m3", MessageRole::Victim, "are you there?", 9_000, 2);
    assert_eq!(store.append_or_merge(late), AppendOutcome::Rejected);
    store.update_session_meta(SessionPatch::status(SessionStatus::Completed));
    assert!(store.session().is_none());
    assert!(store.is_empty());
}
