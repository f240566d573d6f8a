//! Application wiring for the Flytrap CLI
//!
//! [`FlytrapApp`] assembles the engine from configuration: one event
//! router shared by the transport and every consumer, one store behind
//! a lock, one coordinator, one transport handle. Commands drive the
//! coordinator; the console additionally consumes the live streams.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::warn;

use flytrap_client::{
    EngagementApi, HttpEngagementApi, SessionCoordinator, TransportStatsSnapshot, WsTransport,
};
use flytrap_core::{EventKind, EventRouter, Frame, LinkState, SessionStore};

use crate::config::AppConfig;
use crate::error::Result;

/// The assembled Flytrap client, one per process.
pub struct FlytrapApp {
    config: AppConfig,
    transport: WsTransport,
    coordinator: SessionCoordinator,
    live: Option<mpsc::UnboundedReceiver<Frame>>,
    notices: Option<mpsc::UnboundedReceiver<Frame>>,
}

impl FlytrapApp {
    /// Wires up the engine. Nothing connects until
    /// [`connect_live`](Self::connect_live) is called.
    pub fn new(config: AppConfig) -> Result<Self> {
        let engine = config.flytrap();
        let router = Arc::new(EventRouter::new());
        let store = Arc::new(Mutex::new(SessionStore::new(engine.store, engine.reconcile)));
        let api: Arc<dyn EngagementApi> = Arc::new(HttpEngagementApi::new(&engine.api)?);
        let coordinator = SessionCoordinator::new(api, store, &engine.api);
        let live = coordinator.subscribe(&router);
        let notices = Self::subscribe_notices(&router);
        let transport = WsTransport::new(engine.transport, Arc::clone(&router));
        Ok(Self {
            config,
            transport,
            coordinator,
            live: Some(live),
            notices: Some(notices),
        })
    }

    /// Link and typing events the coordinator deliberately ignores but
    /// the console wants to show.
    fn subscribe_notices(router: &EventRouter) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        for kind in [
            EventKind::Connected,
            EventKind::Disconnected,
            EventKind::Error,
            EventKind::TypingStart,
            EventKind::TypingStop,
        ] {
            let tx = tx.clone();
            router.on(kind, move |frame| {
                let _ = tx.send(frame.clone());
            });
        }
        rx
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    pub fn store(&self) -> Arc<Mutex<SessionStore>> {
        self.coordinator.store()
    }

    pub fn link_state(&self) -> LinkState {
        self.transport.state()
    }

    pub fn transport_stats(&self) -> TransportStatsSnapshot {
        self.transport.stats()
    }

    /// Opens the live event stream.
    pub fn connect_live(&self) -> Result<()> {
        self.transport.connect()?;
        Ok(())
    }

    /// Waits until the link reports connected, or the deadline passes.
    pub async fn wait_for_link(&self, deadline: Duration) -> bool {
        let mut watch = self.transport.watch_state();
        if watch.borrow().is_connected() {
            return true;
        }
        timeout(deadline, async {
            while watch.changed().await.is_ok() {
                if watch.borrow().is_connected() {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false)
    }

    /// Hands the live and notice streams to the console loop. Can only
    /// be done once.
    pub fn take_streams(
        &mut self,
    ) -> Option<(mpsc::UnboundedReceiver<Frame>, mpsc::UnboundedReceiver<Frame>)> {
        match (self.live.take(), self.notices.take()) {
            (Some(live), Some(notices)) => Some((live, notices)),
            _ => None,
        }
    }

    /// Folds any frames queued on the live channel into the store.
    ///
    /// One-shot commands call this after their request settles so echo
    /// identities arriving over the stream get merged before printing.
    pub async fn drain_live(&mut self) {
        let Some(mut live) = self.live.take() else {
            return;
        };
        while let Ok(frame) = live.try_recv() {
            if let Err(err) = self.coordinator.apply_live(&frame).await {
                warn!(%err, "failed to fold live frame");
            }
        }
        self.live = Some(live);
    }

    /// Closes the live stream and waits for the transport to wind down.
    pub async fn shutdown(&self) {
        self.transport.disconnect();
        self.transport.closed().await;
    }
}

impl std::fmt::Debug for FlytrapApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlytrapApp")
            .field("link", &self.transport.state())
            .finish()
    }
}
