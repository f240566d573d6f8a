//! WebSocket transport to the engagement server's live event stream.
//!
//! [`WsTransport`] is a cheap handle; the actual connection lives in a
//! spawned supervisor task that owns the socket, pumps outbound frames,
//! routes inbound frames, and drives the reconnect loop. The handle and
//! the task share state through a watch channel, so callers can read or
//! await [`LinkState`] transitions without touching the socket.
//!
//! Lifecycle is surfaced through the router as regular frames: a
//! `connected` on every successful (re)connect, an `error` for each
//! failed attempt or dropped link, and exactly one `disconnected` when
//! the task goes quiet, whether that was a requested disconnect or an
//! exhausted reconnect budget.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use flytrap_core::errors::TransportError;
use flytrap_core::{
    EventKind, EventRouter, Frame, FlytrapResult, LinkState, ReconnectDecision, Reconnector,
    TransportConfig,
};

// ----------------------------------------------------------------------------
// URL normalization
// ----------------------------------------------------------------------------

/// Normalizes a configured endpoint into a WebSocket URL.
///
/// Accepts `ws://` and `wss://` as-is, rewrites `http(s)://` to the
/// matching WebSocket scheme, and defaults bare hosts to `wss://`
/// (plain `ws://` for localhost). The `/ws` path is appended when the
/// URL does not already end with it.
pub(crate) fn normalize_ws_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    let with_scheme = if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
        trimmed.to_string()
    } else if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if trimmed.starts_with("localhost") || trimmed.starts_with("127.0.0.1") {
        format!("ws://{trimmed}")
    } else {
        format!("wss://{trimmed}")
    };

    if with_scheme.ends_with("/ws") {
        with_scheme
    } else {
        format!("{with_scheme}/ws")
    }
}

// ----------------------------------------------------------------------------
// Transport statistics
// ----------------------------------------------------------------------------

/// Counters kept by the supervisor task. Shared with the handle through
/// an `Arc`, so reads never block the socket loop.
#[derive(Debug, Default)]
pub struct TransportStats {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    frames_received: AtomicU64,
    malformed_frames: AtomicU64,
    connect_attempts: AtomicU64,
}

impl TransportStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> TransportStatsSnapshot {
        TransportStatsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
        }
    }
}

/// Plain-value view of [`TransportStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStatsSnapshot {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub frames_received: u64,
    pub malformed_frames: u64,
    pub connect_attempts: u64,
}

// ----------------------------------------------------------------------------
// Transport handle
// ----------------------------------------------------------------------------

/// Handle to the live event stream.
///
/// One logical connection at a time: `connect` while the link is busy is
/// a no-op, and `disconnect` tells the supervisor to close the socket
/// and stop reconnecting. All frames received from the server are
/// published through the shared [`EventRouter`].
pub struct WsTransport {
    config: TransportConfig,
    router: Arc<EventRouter>,
    state: Arc<watch::Sender<LinkState>>,
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<TransportStats>,
}

impl WsTransport {
    /// Creates a disconnected transport. Nothing is spawned until
    /// [`connect`](Self::connect) is called.
    pub fn new(config: TransportConfig, router: Arc<EventRouter>) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            config,
            router,
            state: Arc::new(state),
            outbound: Mutex::new(None),
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
            stats: Arc::new(TransportStats::default()),
        }
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Watch channel for link state transitions.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Counter snapshot for status displays.
    pub fn stats(&self) -> TransportStatsSnapshot {
        self.stats.snapshot()
    }

    /// Opens the connection and starts the supervisor task.
    ///
    /// Calling this while the link is connecting, connected, or
    /// reconnecting changes nothing. Only an unparseable URL fails
    /// eagerly; connection failures are reported asynchronously as
    /// `error` frames and retried on the configured schedule.
    pub fn connect(&self) -> FlytrapResult<()> {
        if self.state.borrow().is_busy() {
            debug!(state = %self.state.borrow().name(), "connect ignored, link already active");
            return Ok(());
        }

        let normalized = normalize_ws_url(&self.config.url);
        let url = Url::parse(&normalized)
            .map_err(|_| TransportError::InvalidUrl { url: normalized })?;

        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_buffer);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *lock(&self.outbound) = Some(outbound_tx);
        *lock(&self.shutdown) = Some(shutdown_tx);

        // Flip the state before spawning so a connect racing this one
        // sees the link as busy.
        self.state.send_replace(LinkState::Connecting);

        let supervisor = Supervisor {
            url,
            config: self.config.clone(),
            router: Arc::clone(&self.router),
            state: Arc::clone(&self.state),
            stats: Arc::clone(&self.stats),
        };
        *lock(&self.task) = Some(tokio::spawn(supervisor.run(outbound_rx, shutdown_rx)));
        Ok(())
    }

    /// Closes the connection and disables automatic reconnection.
    ///
    /// No-op when the link is already down.
    pub fn disconnect(&self) {
        // Dropping the outbound sender makes in-flight `send` calls fail
        // fast instead of queueing into a dying session.
        lock(&self.outbound).take();
        match lock(&self.shutdown).take() {
            Some(tx) => {
                let _ = tx.send(true);
            }
            None => debug!("disconnect ignored, link already down"),
        }
    }

    /// Waits for the supervisor task to finish. Meant to be called after
    /// [`disconnect`](Self::disconnect) when a clean teardown matters.
    pub async fn closed(&self) {
        let task = lock(&self.task).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Queues a frame for delivery.
    ///
    /// Frames are only accepted while the link is connected; anything
    /// else is dropped and counted, never buffered for later.
    pub fn send(&self, frame: Frame) {
        if !self.state.borrow().is_connected() {
            TransportStats::bump(&self.stats.frames_dropped);
            debug!(kind = %frame.kind, "dropping frame, link not connected");
            return;
        }
        let guard = lock(&self.outbound);
        match guard.as_ref() {
            Some(tx) => {
                if let Err(err) = tx.try_send(frame) {
                    TransportStats::bump(&self.stats.frames_dropped);
                    warn!(%err, "dropping frame, outbound queue unavailable");
                }
            }
            None => {
                TransportStats::bump(&self.stats.frames_dropped);
                debug!("dropping frame, no outbound queue");
            }
        }
    }
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("url", &self.config.url)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ----------------------------------------------------------------------------
// Supervisor task
// ----------------------------------------------------------------------------

/// Why a connected session ended.
enum SessionEnd {
    /// Disconnect requested by the handle.
    Shutdown,
    /// The socket dropped out from under us.
    LinkLost(String),
}

struct Supervisor {
    url: Url,
    config: TransportConfig,
    router: Arc<EventRouter>,
    state: Arc<watch::Sender<LinkState>>,
    stats: Arc<TransportStats>,
}

impl Supervisor {
    /// Connect/reconnect loop. Exits on shutdown or when the reconnect
    /// budget runs out; either way the terminal `disconnected` frame is
    /// published exactly once, from the single exit point below.
    async fn run(self, mut outbound: mpsc::Receiver<Frame>, mut shutdown: watch::Receiver<bool>) {
        // The handle already flipped the state to Connecting.
        let mut reconnector = Reconnector::new(
            self.config.reconnect_delay,
            self.config.max_reconnect_attempts,
        );
        info!(url = %self.url, "connecting to live event stream");

        loop {
            if *shutdown.borrow() {
                break;
            }
            TransportStats::bump(&self.stats.connect_attempts);
            match connect_async(self.url.as_str()).await {
                Ok((ws, _response)) => {
                    reconnector.connected();
                    self.state.send_replace(LinkState::Connected);
                    info!("live event stream connected");
                    self.emit(EventKind::Connected, json!({}));
                    match self.run_session(ws, &mut outbound, &mut shutdown).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::LinkLost(reason) => {
                            warn!(%reason, "live event stream dropped");
                            self.emit_error(&reason);
                        }
                    }
                }
                Err(err) => {
                    let reason = err.to_string();
                    warn!(%reason, "connection attempt failed");
                    self.emit_error(&reason);
                }
            }

            match reconnector.next_attempt() {
                ReconnectDecision::Retry { attempt, delay } => {
                    self.state.send_replace(LinkState::Reconnecting { attempt });
                    debug!(attempt, ?delay, "reconnecting after delay");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
                ReconnectDecision::GiveUp => {
                    warn!(
                        attempts = reconnector.attempts_made(),
                        "reconnect budget exhausted"
                    );
                    break;
                }
            }
        }

        self.state.send_replace(LinkState::Disconnected);
        self.emit(EventKind::Disconnected, json!({}));
        info!("live event stream closed");
    }

    /// Pumps one connected socket until it drops or shutdown is asked.
    async fn run_session(
        &self,
        ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
        outbound: &mut mpsc::Receiver<Frame>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let (mut write, mut read) = ws.split();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        let _ = write.send(WsMessage::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                }
                queued = outbound.recv() => {
                    let Some(frame) = queued else {
                        // Handle dropped its sender: treat as disconnect.
                        let _ = write.send(WsMessage::Close(None)).await;
                        return SessionEnd::Shutdown;
                    };
                    match frame.encode() {
                        Ok(text) => match write.send(WsMessage::Text(text)).await {
                            Ok(()) => TransportStats::bump(&self.stats.frames_sent),
                            Err(err) => return SessionEnd::LinkLost(err.to_string()),
                        },
                        Err(err) => {
                            TransportStats::bump(&self.stats.frames_dropped);
                            warn!(%err, "failed to encode outbound frame");
                        }
                    }
                }
                incoming = read.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => self.route_text(&text),
                        Some(Ok(WsMessage::Close(_))) => {
                            return SessionEnd::LinkLost("server closed the connection".to_string());
                        }
                        // Pings are answered by tungstenite; binary frames
                        // carry nothing we route.
                        Some(Ok(_)) => {}
                        Some(Err(err)) => return SessionEnd::LinkLost(err.to_string()),
                        None => return SessionEnd::LinkLost("stream ended".to_string()),
                    }
                }
            }
        }
    }

    /// Parses and routes one text frame. A frame that does not parse is
    /// logged and dropped; the connection stays up.
    fn route_text(&self, text: &str) {
        TransportStats::bump(&self.stats.frames_received);
        match Frame::parse(text) {
            Ok(frame) => {
                if !frame.kind.is_known() {
                    debug!(kind = %frame.kind, "forwarding unknown event type");
                }
                self.router.emit(&frame);
            }
            Err(err) => {
                TransportStats::bump(&self.stats.malformed_frames);
                warn!(%err, "discarding malformed frame");
            }
        }
    }

    fn emit(&self, kind: EventKind, payload: serde_json::Value) {
        self.router.emit(&Frame::new(kind, payload));
    }

    fn emit_error(&self, reason: &str) {
        self.emit(EventKind::Error, json!({ "message": reason }));
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
