//! Session lifecycle coordination.
//!
//! [`SessionCoordinator`] owns the engagement flow end to end: a start
//! records the scammer's message optimistically before the service
//! call, a resume hydrates local state at most once, an end cleans up
//! locally before asking the server, and live frames are folded into
//! the store through the same merge path as request/response results.
//!
//! All mutation goes through [`SessionStore`] merge operations under a
//! short-lived lock, never through read-modify-write over await points,
//! so an in-flight request finishing after the session changed cannot
//! resurrect stale state; the store's own session guards discard it.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use flytrap_core::errors::SessionError;
use flytrap_core::frame::{
    EntityPayload, RiskPayload, ScamPayload, SessionEndedPayload, SessionUpdatePayload,
};
use flytrap_core::{
    ApiConfig, AppendOutcome, DeliveryState, EventKind, EventRouter, FlytrapError, FlytrapResult,
    Frame, LiveMessage, Message, MessageId, MessagePatch, MessageRole, SendFailure, Session,
    SessionId, SessionPatch, SessionStatus, SessionStore, SessionSummary, SystemTimeSource,
    TimeSource, Timestamp,
};

use crate::api::{ContinueRequest, EngagementApi, EngagementResponse, HistoryPage, StartSessionRequest};

// ----------------------------------------------------------------------------
// Start options
// ----------------------------------------------------------------------------

/// Optional knobs for opening an engagement.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Where the scammer message came from (`sms`, `whatsapp`, ...).
    pub source_type: Option<String>,
    /// Requested persona; the service picks one when unset.
    pub persona: Option<String>,
}

// ----------------------------------------------------------------------------
// Coordinator
// ----------------------------------------------------------------------------

/// Drives session lifecycle against an [`EngagementApi`] and a shared
/// [`SessionStore`].
///
/// The coordinator holds no session state of its own; everything lives
/// in the store so that views, live-frame folding, and lifecycle calls
/// observe one consistent log.
pub struct SessionCoordinator<T: TimeSource = SystemTimeSource> {
    api: Arc<dyn EngagementApi>,
    store: Arc<Mutex<SessionStore>>,
    time: T,
    page_size: u32,
}

impl SessionCoordinator<SystemTimeSource> {
    pub fn new(
        api: Arc<dyn EngagementApi>,
        store: Arc<Mutex<SessionStore>>,
        config: &ApiConfig,
    ) -> Self {
        Self::with_time_source(api, store, config, SystemTimeSource::new())
    }
}

impl<T: TimeSource> SessionCoordinator<T> {
    pub fn with_time_source(
        api: Arc<dyn EngagementApi>,
        store: Arc<Mutex<SessionStore>>,
        config: &ApiConfig,
        time: T,
    ) -> Self {
        Self {
            api,
            store,
            time,
            page_size: config.history_page_size,
        }
    }

    /// Shared handle to the store, for views and status displays.
    pub fn store(&self) -> Arc<Mutex<SessionStore>> {
        Arc::clone(&self.store)
    }

    // ------------------------------------------------------------------------
    // Lifecycle operations
    // ------------------------------------------------------------------------

    /// Opens a new engagement with the scammer's first message.
    ///
    /// The message is recorded optimistically before the request goes
    /// out; on failure it stays visible in the error state so the
    /// operator can retry. Starting over an active session clears the
    /// previous one first.
    pub async fn start(
        &self,
        scammer_message: &str,
        options: StartOptions,
    ) -> FlytrapResult<SessionId> {
        let draft = Message::optimistic(
            None,
            MessageRole::Scammer,
            scammer_message,
            self.time.now(),
        );
        let draft_id = draft.id.clone();
        {
            let mut store = self.store.lock().await;
            if store.session().is_some() {
                debug!("starting over an active session, clearing previous state");
                store.clear();
            }
            store.append_or_merge(draft);
        }

        let request = StartSessionRequest {
            scammer_message: scammer_message.to_string(),
            source_type: options.source_type,
            persona: options.persona,
        };
        match self.api.start_session(request).await {
            Ok(response) => {
                let session_id = response.session_id.clone();
                let now = self.time.now();
                let mut store = self.store.lock().await;
                let mut session = Session::new(session_id.clone(), now);
                session.status = response.session_status.unwrap_or(SessionStatus::Ongoing);
                session.persona = response.persona_used.clone();
                session.scam_type = response.scam_type.clone();
                session.confidence = response.confidence;
                session.turn_count = response.turn_number;
                session.winding_down = response.should_continue == Some(false);
                store.activate_session(session);
                Self::fold_exchange(&mut store, &draft_id, response, now);
                info!(%session_id, "engagement started");
                Ok(session_id)
            }
            Err(err) => {
                self.mark_send_failed(&draft_id, &err).await;
                Err(err)
            }
        }
    }

    /// Relays the next scammer message into the active engagement.
    ///
    /// Returns the client identifier of the optimistic record; on
    /// failure the record is kept in the error state for retry.
    pub async fn send(&self, content: &str) -> FlytrapResult<MessageId> {
        let (session_id, draft_id) = {
            let mut store = self.store.lock().await;
            let session_id = store
                .active_session_id()
                .cloned()
                .ok_or_else(FlytrapError::no_active_session)?;
            let draft = Message::optimistic(
                Some(session_id.clone()),
                MessageRole::Scammer,
                content,
                self.time.now(),
            );
            let draft_id = draft.id.clone();
            store.append_or_merge(draft);
            (session_id, draft_id)
        };

        let request = ContinueRequest {
            session_id: session_id.clone(),
            scammer_message: content.to_string(),
        };
        match self.api.continue_session(request).await {
            Ok(response) => {
                let meta = SessionPatch {
                    status: response.session_status,
                    persona: response.persona_used.clone(),
                    scam_type: response.scam_type.clone(),
                    confidence: response.confidence,
                    turn_count: Some(response.turn_number),
                    winding_down: response.should_continue.map(|more| !more),
                    ..SessionPatch::default()
                };
                let now = self.time.now();
                let mut store = self.store.lock().await;
                Self::fold_exchange(&mut store, &draft_id, response, now);
                // The session may have changed while the request was in
                // flight; metadata must not leak across sessions.
                if store.active_session_id() == Some(&session_id) {
                    store.update_session_meta(meta);
                } else {
                    debug!(%session_id, "session changed mid-request, dropping metadata");
                }
                Ok(draft_id)
            }
            Err(err) => {
                self.mark_send_failed(&draft_id, &err).await;
                warn!(%err, "relay failed, message kept for retry");
                Err(err)
            }
        }
    }

    /// Retries a failed send.
    ///
    /// The failed record is removed and its content replayed through
    /// [`send`](Self::send), which assigns a fresh identity. Only
    /// records in a retryable error state qualify.
    pub async fn retry(&self, message_id: &MessageId) -> FlytrapResult<MessageId> {
        let content = {
            let mut store = self.store.lock().await;
            let Some(record) = store.message(message_id) else {
                return Err(SessionError::MessageNotFound {
                    message_id: message_id.as_str().to_string(),
                }
                .into());
            };
            let retryable = match &record.delivery {
                DeliveryState::Error(failure) => failure.retry_available,
                _ => false,
            };
            if !retryable {
                return Err(SessionError::NotRetryable {
                    message_id: message_id.as_str().to_string(),
                }
                .into());
            }
            match store.remove_message(message_id) {
                Some(record) => record.content,
                None => {
                    return Err(SessionError::MessageNotFound {
                        message_id: message_id.as_str().to_string(),
                    }
                    .into())
                }
            }
        };
        self.send(&content).await
    }

    /// Hydrates local state for a dashboard reopening on an existing
    /// engagement.
    ///
    /// One-shot: when the session is already active with a non-empty
    /// log, nothing is fetched and `Ok(false)` comes back. History is
    /// paged oldest-first until the service stops returning a cursor.
    pub async fn resume(&self, session_id: &SessionId) -> FlytrapResult<bool> {
        {
            let store = self.store.lock().await;
            if store.is_hydrated_for(session_id) {
                debug!(%session_id, "already hydrated, skipping fetch");
                return Ok(false);
            }
        }

        let session = self.api.fetch_session(session_id).await?.into_session();

        let mut history: Vec<Message> = Vec::new();
        let mut page = HistoryPage::first(self.page_size);
        loop {
            let batch = self.api.fetch_messages(session_id, page).await?;
            history.extend(batch.messages.into_iter().map(LiveMessage::into_message));
            match batch.next_cursor {
                Some(cursor) if Some(cursor) != page.after_turn => {
                    page = HistoryPage::after(cursor, self.page_size);
                }
                Some(_) => {
                    warn!(%session_id, "history cursor did not advance, stopping pagination");
                    break;
                }
                None => break,
            }
        }

        let mut store = self.store.lock().await;
        if store.is_hydrated_for(session_id) {
            debug!(%session_id, "hydrated concurrently, discarding fetch");
            return Ok(false);
        }
        info!(%session_id, messages = history.len(), "session resumed");
        store.set_active_session(session, history);
        Ok(true)
    }

    /// Ends the active engagement.
    ///
    /// Local cleanup happens first and is never rolled back: the
    /// session is gone locally before the termination request settles.
    /// On success a summary comes back, derived locally when the server
    /// cannot provide one; a server-side failure is returned as the
    /// error it is, with local state already cleared.
    pub async fn end(&self) -> FlytrapResult<SessionSummary> {
        let (session_id, local) = {
            let mut store = self.store.lock().await;
            let session_id = store
                .active_session_id()
                .cloned()
                .ok_or_else(FlytrapError::no_active_session)?;
            let local = store.local_summary();
            store.clear();
            (session_id, local)
        };

        match self.api.end_session(&session_id).await {
            Ok(Some(summary)) => {
                info!(%session_id, total_turns = summary.total_turns, "engagement ended");
                Ok(summary)
            }
            Ok(None) => {
                info!(%session_id, "engagement ended, summary derived locally");
                Ok(local)
            }
            Err(err) => {
                warn!(%session_id, %err, "server-side end failed after local cleanup");
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Live frame folding
    // ------------------------------------------------------------------------

    /// Registers the coordinator's event interests on the router.
    ///
    /// Handlers only forward frames into the returned channel; folding
    /// happens on the caller's task via [`apply_live`](Self::apply_live),
    /// so router delivery never blocks on the store lock.
    pub fn subscribe(&self, router: &EventRouter) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        for kind in [
            EventKind::MessageReceived,
            EventKind::MessageSent,
            EventKind::SessionStarted,
            EventKind::SessionUpdated,
            EventKind::SessionEnded,
            EventKind::IntelligenceEntity,
            EventKind::IntelligenceScam,
            EventKind::IntelligenceRisk,
        ] {
            let tx = tx.clone();
            router.on(kind, move |frame| {
                let _ = tx.send(frame.clone());
            });
        }
        rx
    }

    /// Folds one live frame into the store.
    ///
    /// Frames for a session other than the active one are ignored;
    /// message frames additionally pass through the store's own
    /// session guard and merge path, and report what the merge did so
    /// a view can distinguish a new message from a collapsed echo.
    pub async fn apply_live(&self, frame: &Frame) -> FlytrapResult<Option<AppendOutcome>> {
        match &frame.kind {
            EventKind::MessageReceived | EventKind::MessageSent => {
                let live: LiveMessage = frame.decode_payload()?;
                let mut store = self.store.lock().await;
                return Ok(Some(store.append_or_merge(live.into_message())));
            }
            EventKind::SessionStarted | EventKind::SessionUpdated => {
                let update: SessionUpdatePayload = frame.decode_payload()?;
                let mut store = self.store.lock().await;
                if store.active_session_id() == Some(&update.session_id) {
                    store.update_session_meta(update.patch);
                } else {
                    debug!(session_id = %update.session_id, "update for inactive session ignored");
                }
            }
            EventKind::SessionEnded => {
                let ended: SessionEndedPayload = frame.decode_payload()?;
                let mut store = self.store.lock().await;
                if store.active_session_id() == Some(&ended.session_id) {
                    info!(session_id = %ended.session_id, "session ended by server");
                    store.clear();
                }
            }
            EventKind::IntelligenceEntity => {
                let payload: EntityPayload = frame.decode_payload()?;
                let mut store = self.store.lock().await;
                if store.active_session_id() == Some(&payload.session_id) {
                    store.add_entities([payload.entity]);
                }
            }
            EventKind::IntelligenceScam => {
                let payload: ScamPayload = frame.decode_payload()?;
                let mut store = self.store.lock().await;
                if store.active_session_id() == Some(&payload.session_id) {
                    store.update_session_meta(SessionPatch {
                        scam_type: Some(payload.scam_type),
                        confidence: Some(payload.confidence),
                        ..SessionPatch::default()
                    });
                }
            }
            EventKind::IntelligenceRisk => {
                let payload: RiskPayload = frame.decode_payload()?;
                let mut store = self.store.lock().await;
                if store.active_session_id() == Some(&payload.session_id) {
                    if let Some(risk) = payload.effective_risk() {
                        store.update_session_meta(SessionPatch {
                            risk_level: Some(risk),
                            ..SessionPatch::default()
                        });
                    }
                }
            }
            other => debug!(kind = %other, "no local state to update for event"),
        }
        Ok(None)
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Applies one engagement response to the store: confirm the draft,
    /// append the persona's reply, harvest bundled intelligence.
    ///
    /// Every step self-guards against a session change that happened
    /// while the request was in flight.
    fn fold_exchange(
        store: &mut SessionStore,
        draft_id: &MessageId,
        response: EngagementResponse,
        now: Timestamp,
    ) {
        let EngagementResponse {
            session_id,
            response: reply,
            extracted_intelligence,
            turn_number,
            ..
        } = response;

        store.update_message(
            draft_id,
            MessagePatch {
                delivery: Some(DeliveryState::Sent),
                session_id: Some(session_id.clone()),
                turn: Some(turn_number),
                ..MessagePatch::default()
            },
        );
        store.append_or_merge(Message::relayed(
            session_id,
            MessageRole::Victim,
            reply,
            now,
            Some(turn_number),
        ));
        if let Some(intelligence) = extracted_intelligence {
            if !intelligence.is_empty() {
                let added = store.add_entities(intelligence.into_entities(now));
                if added > 0 {
                    debug!(added, "absorbed bundled intelligence");
                }
            }
        }
    }

    async fn mark_send_failed(&self, draft_id: &MessageId, err: &FlytrapError) {
        let mut store = self.store.lock().await;
        let patch = MessagePatch::delivery(DeliveryState::Error(SendFailure::send_failed(
            err.to_string(),
        )));
        if !store.update_message(draft_id, patch) {
            debug!(%draft_id, "failed send no longer in the log");
        }
    }
}

impl<T: TimeSource> std::fmt::Debug for SessionCoordinator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("page_size", &self.page_size)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio_test::assert_ok;

    use crate::api::{HistoryBatch, SessionDetail};
    use flytrap_core::{
        ReconcileConfig, RiskLevel, StoreConfig,
    };

    // ------------------------------------------------------------------------
    // Scripted service double
    // ------------------------------------------------------------------------

    #[derive(Default)]
    struct MockApi {
        start_response: StdMutex<Option<EngagementResponse>>,
        continue_responses: StdMutex<Vec<EngagementResponse>>,
        session_detail: StdMutex<Option<SessionDetail>>,
        history: StdMutex<Vec<HistoryBatch>>,
        end_summary: StdMutex<Option<SessionSummary>>,
        fail_next: AtomicBool,
        end_fails: AtomicBool,
        history_calls: AtomicUsize,
        calls: StdMutex<Vec<String>>,
    }

    impl MockApi {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn take_failure(&self) -> bool {
            self.fail_next.swap(false, Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EngagementApi for MockApi {
        async fn start_session(
            &self,
            request: StartSessionRequest,
        ) -> FlytrapResult<EngagementResponse> {
            self.record(format!("start:{}", request.scammer_message));
            if self.take_failure() {
                return Err(FlytrapError::api_status(503, "engine overloaded"));
            }
            self.start_response
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| FlytrapError::api_status(500, "no scripted start"))
        }

        async fn continue_session(
            &self,
            request: ContinueRequest,
        ) -> FlytrapResult<EngagementResponse> {
            self.record(format!("continue:{}", request.scammer_message));
            if self.take_failure() {
                return Err(FlytrapError::api_status(503, "engine overloaded"));
            }
            let mut scripted = self.continue_responses.lock().unwrap();
            if scripted.is_empty() {
                return Err(FlytrapError::api_status(500, "no scripted continue"));
            }
            Ok(scripted.remove(0))
        }

        async fn fetch_session(&self, session_id: &SessionId) -> FlytrapResult<SessionDetail> {
            self.record(format!("fetch_session:{}", session_id.as_str()));
            self.session_detail
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| FlytrapError::api_status(404, "unknown session"))
        }

        async fn fetch_messages(
            &self,
            session_id: &SessionId,
            page: HistoryPage,
        ) -> FlytrapResult<HistoryBatch> {
            self.record(format!(
                "fetch_messages:{}:{:?}",
                session_id.as_str(),
                page.after_turn
            ));
            let call = self.history_calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self.history.lock().unwrap();
            Ok(scripted
                .get(call)
                .cloned()
                .unwrap_or(HistoryBatch {
                    messages: Vec::new(),
                    next_cursor: None,
                }))
        }

        async fn end_session(
            &self,
            session_id: &SessionId,
        ) -> FlytrapResult<Option<SessionSummary>> {
            self.record(format!("end:{}", session_id.as_str()));
            if self.end_fails.load(Ordering::SeqCst) {
                return Err(FlytrapError::api_status(500, "backend down"));
            }
            Ok(self.end_summary.lock().unwrap().clone())
        }
    }

    // ------------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------------

    #[derive(Clone, Copy)]
    struct FixedTime(u64);

    impl TimeSource for FixedTime {
        fn now(&self) -> Timestamp {
            Timestamp::new(self.0)
        }
    }

    fn engagement_response(session: &str, reply: &str, turn: u32) -> EngagementResponse {
        EngagementResponse {
            session_id: SessionId::new(session),
            response: reply.to_string(),
            persona_used: Some("confused_grandparent".to_string()),
            scam_type: Some("bank_fraud".to_string()),
            confidence: Some(0.8),
            extracted_intelligence: None,
            turn_number: turn,
            session_status: Some(SessionStatus::Ongoing),
            should_continue: Some(true),
        }
    }

    fn session_detail(session: &str, turns: u32) -> SessionDetail {
        SessionDetail {
            session_id: SessionId::new(session),
            status: SessionStatus::Ongoing,
            persona: Some("tech_novice".to_string()),
            scam_type: Some("tech_support".to_string()),
            confidence: Some(0.7),
            risk_level: Some(RiskLevel::High),
            turn_count: turns,
            started_at: Timestamp::new(10_000),
        }
    }

    fn live(id: &str, session: &str, role: MessageRole, content: &str, ts: u64, turn: u32) -> LiveMessage {
        LiveMessage {
            id: MessageId::new(id),
            session_id: SessionId::new(session),
            role,
            content: content.to_string(),
            timestamp: Timestamp::new(ts),
            turn: Some(turn),
        }
    }

    fn coordinator(api: Arc<MockApi>) -> SessionCoordinator<FixedTime> {
        let store = Arc::new(Mutex::new(SessionStore::new(
            StoreConfig::testing(),
            ReconcileConfig::default(),
        )));
        SessionCoordinator::with_time_source(api, store, &ApiConfig::testing(), FixedTime(50_000))
    }

    // ------------------------------------------------------------------------
    // Start / send / retry
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_start_records_optimistically_and_binds_session() {
        let api = Arc::new(MockApi::default());
        *api.start_response.lock().unwrap() =
            Some(engagement_response("sess-1", "Oh dear, which account?", 1));
        let coordinator = coordinator(Arc::clone(&api));

        let session_id = assert_ok!(
            coordinator
                .start("Your account will be blocked today", StartOptions::default())
                .await
        );
        assert_eq!(session_id, SessionId::new("sess-1"));

        let store = coordinator.store();
        let store = store.lock().await;
        assert_eq!(store.active_session_id(), Some(&session_id));
        let messages = store.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::Scammer);
        assert_eq!(messages[0].delivery, DeliveryState::Sent);
        assert_eq!(messages[0].turn, Some(1));
        assert_eq!(messages[1].role, MessageRole::Victim);
        assert_eq!(messages[1].content, "Oh dear, which account?");
        let session = store.session().unwrap();
        assert_eq!(session.persona.as_deref(), Some("confused_grandparent"));
        assert_eq!(session.turn_count, 1);
    }

    #[tokio::test]
    async fn test_start_failure_keeps_the_message_visible() {
        let api = Arc::new(MockApi::default());
        api.fail_next.store(true, Ordering::SeqCst);
        let coordinator = coordinator(Arc::clone(&api));

        let result = coordinator
            .start("Congratulations, you won a lottery", StartOptions::default())
            .await;
        assert!(result.is_err());

        let store = coordinator.store();
        let store = store.lock().await;
        assert!(store.session().is_none());
        let messages = store.messages();
        assert_eq!(messages.len(), 1);
        match &messages[0].delivery {
            DeliveryState::Error(failure) => {
                assert_eq!(failure.code, "SEND_FAILED");
                assert!(failure.retry_available);
            }
            other => panic!("expected error delivery, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_without_a_session_is_refused() {
        let coordinator = coordinator(Arc::new(MockApi::default()));
        let err = coordinator.send("hello?").await.unwrap_err();
        assert!(matches!(
            err,
            FlytrapError::Session(SessionError::NoActiveSession)
        ));
    }

    #[tokio::test]
    async fn test_send_confirms_draft_and_appends_reply() {
        let api = Arc::new(MockApi::default());
        *api.start_response.lock().unwrap() =
            Some(engagement_response("sess-1", "Hello, who is this?", 1));
        api.continue_responses.lock().unwrap().push(engagement_response(
            "sess-1",
            "I don't have my card with me",
            2,
        ));
        let coordinator = coordinator(Arc::clone(&api));

        assert_ok!(
            coordinator
                .start("Share your card number to unblock", StartOptions::default())
                .await
        );
        let draft_id = assert_ok!(coordinator.send("It is urgent, share the OTP now").await);

        let store = coordinator.store();
        let store = store.lock().await;
        let messages = store.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(
            messages.iter().map(|m| m.turn).collect::<Vec<_>>(),
            vec![Some(1), Some(1), Some(2), Some(2)]
        );
        let draft = store.message(&draft_id).unwrap();
        assert_eq!(draft.delivery, DeliveryState::Sent);
        assert_eq!(store.session().unwrap().turn_count, 2);
    }

    #[tokio::test]
    async fn test_wind_down_hint_lands_on_the_session() {
        let api = Arc::new(MockApi::default());
        *api.start_response.lock().unwrap() =
            Some(engagement_response("sess-1", "Hello, who is this?", 1));
        let mut closing = engagement_response("sess-1", "I have to go now, goodbye", 2);
        closing.should_continue = Some(false);
        api.continue_responses.lock().unwrap().push(closing);
        let coordinator = coordinator(Arc::clone(&api));

        assert_ok!(
            coordinator
                .start("Stay on the line with me", StartOptions::default())
                .await
        );
        {
            let store = coordinator.store();
            let store = store.lock().await;
            assert!(!store.session().unwrap().winding_down);
        }

        assert_ok!(coordinator.send("Do not hang up").await);

        let store = coordinator.store();
        let store = store.lock().await;
        assert!(store.session().unwrap().winding_down);
    }

    #[tokio::test]
    async fn test_failed_send_retries_with_the_same_content() {
        let api = Arc::new(MockApi::default());
        *api.start_response.lock().unwrap() =
            Some(engagement_response("sess-1", "Hello?", 1));
        api.continue_responses.lock().unwrap().push(engagement_response(
            "sess-1",
            "My grandson handles my phone",
            2,
        ));
        let coordinator = coordinator(Arc::clone(&api));

        assert_ok!(coordinator.start("Install this app", StartOptions::default()).await);

        api.fail_next.store(true, Ordering::SeqCst);
        let failed_id = {
            let err = coordinator.send("Click the link I sent").await;
            assert!(err.is_err());
            let store = coordinator.store();
            let store = store.lock().await;
            store
                .messages()
                .iter()
                .find(|m| m.delivery.is_error())
                .map(|m| m.id.clone())
                .unwrap()
        };

        let new_id = assert_ok!(coordinator.retry(&failed_id).await);
        assert_ne!(new_id, failed_id);

        let store = coordinator.store();
        let store = store.lock().await;
        assert!(store.message(&failed_id).is_none());
        let resent = store.message(&new_id).unwrap();
        assert_eq!(resent.content, "Click the link I sent");
        assert_eq!(resent.delivery, DeliveryState::Sent);

        let continues: Vec<_> = api
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("continue:"))
            .collect();
        assert_eq!(
            continues,
            vec![
                "continue:Click the link I sent".to_string(),
                "continue:Click the link I sent".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_retry_refuses_messages_that_did_not_fail() {
        let api = Arc::new(MockApi::default());
        *api.start_response.lock().unwrap() =
            Some(engagement_response("sess-1", "Hello?", 1));
        let coordinator = coordinator(Arc::clone(&api));

        assert_ok!(coordinator.start("You owe back taxes", StartOptions::default()).await);
        let sent_id = {
            let store = coordinator.store();
            let store = store.lock().await;
            store.messages()[0].id.clone()
        };

        let err = coordinator.retry(&sent_id).await.unwrap_err();
        assert!(matches!(
            err,
            FlytrapError::Session(SessionError::NotRetryable { .. })
        ));

        let missing = MessageId::new("never-existed");
        let err = coordinator.retry(&missing).await.unwrap_err();
        assert!(matches!(
            err,
            FlytrapError::Session(SessionError::MessageNotFound { .. })
        ));
    }

    // ------------------------------------------------------------------------
    // Resume
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_resume_pages_history_then_becomes_a_no_op() {
        let api = Arc::new(MockApi::default());
        *api.session_detail.lock().unwrap() = Some(session_detail("sess-9", 3));
        *api.history.lock().unwrap() = vec![
            HistoryBatch {
                messages: vec![
                    live("m1", "sess-9", MessageRole::Scammer, "Pay the fee", 1_000, 1),
                    live("m2", "sess-9", MessageRole::Victim, "Which fee?", 2_000, 1),
                ],
                next_cursor: Some(1),
            },
            HistoryBatch {
                messages: vec![
                    live("m3", "sess-9", MessageRole::Scammer, "The customs fee", 3_000, 2),
                ],
                next_cursor: None,
            },
        ];
        let coordinator = coordinator(Arc::clone(&api));

        let session_id = SessionId::new("sess-9");
        let hydrated = assert_ok!(coordinator.resume(&session_id).await);
        assert!(hydrated);

        {
            let store = coordinator.store();
            let store = store.lock().await;
            assert_eq!(store.active_session_id(), Some(&session_id));
            assert_eq!(store.messages().len(), 3);
            assert_eq!(store.session().unwrap().risk_level, Some(RiskLevel::High));
        }

        let again = assert_ok!(coordinator.resume(&session_id).await);
        assert!(!again);
        assert_eq!(api.history_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_resume_propagates_backend_errors() {
        let api = Arc::new(MockApi::default());
        let coordinator = coordinator(Arc::clone(&api));

        let result = coordinator.resume(&SessionId::new("sess-404")).await;
        assert!(result.is_err());

        let store = coordinator.store();
        let store = store.lock().await;
        assert!(store.session().is_none());
        assert!(store.is_empty());
    }

    // ------------------------------------------------------------------------
    // End
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_end_prefers_the_server_summary() {
        let api = Arc::new(MockApi::default());
        *api.start_response.lock().unwrap() =
            Some(engagement_response("sess-1", "Hello?", 1));
        *api.end_summary.lock().unwrap() = Some(SessionSummary {
            total_turns: 7,
            entities_extracted: 3,
        });
        let coordinator = coordinator(Arc::clone(&api));

        assert_ok!(coordinator.start("Final notice", StartOptions::default()).await);
        let summary = assert_ok!(coordinator.end().await);
        assert_eq!(summary.total_turns, 7);
        assert_eq!(summary.entities_extracted, 3);

        let store = coordinator.store();
        let store = store.lock().await;
        assert!(store.session().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_end_without_a_server_summary_derives_one_locally() {
        let api = Arc::new(MockApi::default());
        *api.start_response.lock().unwrap() =
            Some(engagement_response("sess-1", "Hello?", 1));
        let coordinator = coordinator(Arc::clone(&api));

        assert_ok!(coordinator.start("Final notice", StartOptions::default()).await);
        let summary = assert_ok!(coordinator.end().await);
        // one exchange happened
        assert_eq!(summary.total_turns, 1);
    }

    #[tokio::test]
    async fn test_end_cleans_up_even_when_the_server_fails() {
        let api = Arc::new(MockApi::default());
        *api.start_response.lock().unwrap() =
            Some(engagement_response("sess-1", "Hello?", 1));
        api.end_fails.store(true, Ordering::SeqCst);
        let coordinator = coordinator(Arc::clone(&api));

        assert_ok!(coordinator.start("Final notice", StartOptions::default()).await);
        let err = coordinator.end().await.unwrap_err();
        assert!(matches!(err, FlytrapError::Api(_)));

        // the failure does not resurrect the session
        {
            let store = coordinator.store();
            let store = store.lock().await;
            assert!(store.session().is_none());
            assert!(store.is_empty());
        }

        let err = coordinator.end().await.unwrap_err();
        assert!(matches!(
            err,
            FlytrapError::Session(SessionError::NoActiveSession)
        ));
    }

    // ------------------------------------------------------------------------
    // Live frames
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_apply_live_merges_echoes_and_ignores_foreign_sessions() {
        let api = Arc::new(MockApi::default());
        *api.start_response.lock().unwrap() =
            Some(engagement_response("sess-1", "Hello, who is this?", 1));
        let coordinator = coordinator(Arc::clone(&api));
        assert_ok!(
            coordinator
                .start("Your electricity will be cut", StartOptions::default())
                .await
        );

        // Echo of the scammer message we just sent, now with identity.
        // The server stamped it on receipt, just before the reply.
        let echo = live(
            "srv-1",
            "sess-1",
            MessageRole::Scammer,
            "Your electricity will be cut",
            49_800,
            1,
        );
        let frame = Frame::new(EventKind::MessageReceived, json!(echo));
        let outcome = assert_ok!(coordinator.apply_live(&frame).await);
        assert_eq!(outcome, Some(AppendOutcome::Merged));

        // Same content from an unrelated session must not land.
        let foreign = live(
            "srv-9",
            "sess-other",
            MessageRole::Scammer,
            "Your electricity will be cut",
            50_600,
            4,
        );
        let frame = Frame::new(EventKind::MessageReceived, json!(foreign));
        let outcome = assert_ok!(coordinator.apply_live(&frame).await);
        assert_eq!(outcome, Some(AppendOutcome::Rejected));

        let store = coordinator.store();
        let store = store.lock().await;
        let messages = store.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].server_id, Some(MessageId::new("srv-1")));
        assert_eq!(messages[0].delivery, DeliveryState::Delivered);
        assert_eq!(store.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_apply_live_updates_intelligence_and_risk() {
        let api = Arc::new(MockApi::default());
        *api.start_response.lock().unwrap() =
            Some(engagement_response("sess-1", "Hello?", 1));
        let coordinator = coordinator(Arc::clone(&api));
        assert_ok!(coordinator.start("Send money now", StartOptions::default()).await);

        let frame = Frame::new(
            EventKind::IntelligenceEntity,
            json!({
                "session_id": "sess-1",
                "entity": {
                    "type": "UPI_ID",
                    "value": "fraudster@upi",
                    "confidence": 0.95,
                    "observed_at": 51_000
                }
            }),
        );
        assert_ok!(coordinator.apply_live(&frame).await);

        let frame = Frame::new(
            EventKind::IntelligenceScam,
            json!({"session_id": "sess-1", "scam_type": "utility_scam", "confidence": 0.9}),
        );
        assert_ok!(coordinator.apply_live(&frame).await);

        // Risk carried only as confidence; the level is derived.
        let frame = Frame::new(
            EventKind::IntelligenceRisk,
            json!({"session_id": "sess-1", "confidence": 0.85}),
        );
        assert_ok!(coordinator.apply_live(&frame).await);

        let store = coordinator.store();
        let store = store.lock().await;
        assert_eq!(store.entities().len(), 1);
        let session = store.session().unwrap();
        assert_eq!(session.scam_type.as_deref(), Some("utility_scam"));
        assert_eq!(session.risk_level, Some(RiskLevel::Critical));
    }

    #[tokio::test]
    async fn test_apply_live_session_ended_clears_only_the_active_session() {
        let api = Arc::new(MockApi::default());
        *api.start_response.lock().unwrap() =
            Some(engagement_response("sess-1", "Hello?", 1));
        let coordinator = coordinator(Arc::clone(&api));
        assert_ok!(coordinator.start("Act now", StartOptions::default()).await);

        let foreign = Frame::new(
            EventKind::SessionEnded,
            json!({"session_id": "sess-other", "status": "COMPLETED"}),
        );
        assert_ok!(coordinator.apply_live(&foreign).await);
        {
            let store = coordinator.store();
            let store = store.lock().await;
            assert!(store.session().is_some());
        }

        let ours = Frame::new(
            EventKind::SessionEnded,
            json!({"session_id": "sess-1", "status": "COMPLETED"}),
        );
        assert_ok!(coordinator.apply_live(&ours).await);
        let store = coordinator.store();
        let store = store.lock().await;
        assert!(store.session().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_forwards_only_registered_kinds() {
        let api = Arc::new(MockApi::default());
        let coordinator = coordinator(api);
        let router = EventRouter::default();
        let mut rx = coordinator.subscribe(&router);

        router.emit(&Frame::new(EventKind::TypingStart, json!({"session_id": "s"})));
        router.emit(&Frame::new(
            EventKind::MessageReceived,
            json!({"id": "m", "session_id": "s", "role": "scammer", "content": "x", "timestamp": 1}),
        ));

        let forwarded = rx.recv().await.unwrap();
        assert_eq!(forwarded.kind, EventKind::MessageReceived);
        assert!(rx.try_recv().is_err());
    }
}
