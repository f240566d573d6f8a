//! Command handlers for the Flytrap CLI

use std::io::Write;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::sleep;
use tracing::{info, warn};

use flytrap_client::StartOptions;
use flytrap_core::frame::{
    EntityPayload, ErrorPayload, RiskPayload, ScamPayload, SessionUpdatePayload,
};
use flytrap_core::{
    AppendOutcome, DeliveryState, EventKind, FlytrapError, Frame, LiveMessage, Message, MessageId,
    MessageRole, SessionId,
};

use crate::app::FlytrapApp;
use crate::cli::{Cli, Commands};
use crate::config::{AppConfig, ConsoleConfig};
use crate::error::{CliError, Result};

/// How long commands wait for the live link before proceeding without it
const LINK_DEADLINE: Duration = Duration::from_secs(3);

/// How long one-shot commands linger for stream echoes after a request
const ECHO_GRACE: Duration = Duration::from_millis(300);

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, app: FlytrapApp) -> Result<()> {
        match cli.command {
            Commands::Console { session } => Self::handle_console_command(app, session).await,
            Commands::Start {
                message,
                source,
                persona,
            } => Self::handle_start_command(app, message, source, persona).await,
            Commands::Send { session, message } => {
                Self::handle_send_command(app, session, message).await
            }
            Commands::Resume { session } => Self::handle_resume_command(app, session).await,
            Commands::Transcript { session } => {
                Self::handle_transcript_command(app, session).await
            }
            Commands::End { session } => Self::handle_end_command(app, session).await,
            Commands::Status => Self::handle_status_command(app).await,
            Commands::ExampleConfig => {
                // Normally short-circuited in main before the app is built.
                println!("{}", AppConfig::example_config());
                Ok(())
            }
        }
    }

    /// Handle the start command
    async fn handle_start_command(
        mut app: FlytrapApp,
        message: String,
        source: Option<String>,
        persona: Option<String>,
    ) -> Result<()> {
        Self::open_link(&app).await?;

        let options = StartOptions {
            source_type: source,
            persona,
        };
        let session_id = app.coordinator().start(&message, options).await?;

        // Give the live stream a moment to echo server identities.
        sleep(ECHO_GRACE).await;
        app.drain_live().await;

        println!("Session started: {}", session_id);
        let store = app.store();
        {
            let store = store.lock().await;
            if let Some(session) = store.session() {
                if let Some(persona) = &session.persona {
                    println!("Persona: {}", persona);
                }
                if let Some(scam_type) = &session.scam_type {
                    println!("Scam type: {}", scam_type);
                }
            }
            println!();
            for message in store.messages() {
                Self::print_message(message);
            }
        }

        app.shutdown().await;
        Ok(())
    }

    /// Handle the send command
    async fn handle_send_command(
        mut app: FlytrapApp,
        session: String,
        message: String,
    ) -> Result<()> {
        Self::open_link(&app).await?;

        let session_id = SessionId::new(session);
        if app.coordinator().resume(&session_id).await? {
            info!("hydrated session {}", session_id);
        }
        app.coordinator().send(&message).await?;

        sleep(ECHO_GRACE).await;
        app.drain_live().await;

        let store = app.store();
        {
            let store = store.lock().await;
            match store
                .messages()
                .iter()
                .rev()
                .find(|m| m.role == MessageRole::Victim)
            {
                Some(reply) => Self::print_message(reply),
                None => println!("No reply yet"),
            }
            if store.session().is_some_and(|s| s.winding_down) {
                println!("Engagement winding down");
            }
        }

        app.shutdown().await;
        Ok(())
    }

    /// Handle the resume command
    async fn handle_resume_command(app: FlytrapApp, session: String) -> Result<()> {
        let session_id = SessionId::new(session);
        app.coordinator().resume(&session_id).await?;

        let store = app.store();
        let store = store.lock().await;
        println!("Resumed session: {}", session_id);
        if let Some(session) = store.session() {
            println!("  Status: {}", session.status);
            println!("  Turns: {}", session.turn_count);
            if session.winding_down {
                println!("  Winding down");
            }
        }
        println!("  Messages: {}", store.messages().len());
        println!("  Entities: {}", store.entities().len());
        Ok(())
    }

    /// Handle the transcript command
    async fn handle_transcript_command(app: FlytrapApp, session: String) -> Result<()> {
        let session_id = SessionId::new(session);
        app.coordinator().resume(&session_id).await?;

        let window = app.config().console.transcript_window;
        let store = app.store();
        let store = store.lock().await;

        if let Some(session) = store.session() {
            println!("Session {}", session.id);
            println!("  Status: {}", session.status);
            if let Some(persona) = &session.persona {
                println!("  Persona: {}", persona);
            }
            if let Some(scam_type) = &session.scam_type {
                println!("  Scam type: {}", scam_type);
            }
            if let Some(risk) = session.risk_level {
                println!("  Risk: {}", risk);
            }
            println!("  Turns: {}", session.turn_count);
            if session.winding_down {
                println!("  Winding down");
            }
        }
        println!();

        let messages = store.messages();
        let skip = messages.len().saturating_sub(window);
        if skip > 0 {
            println!("({} earlier messages not shown)", skip);
        }
        for message in &messages[skip..] {
            Self::print_message(message);
        }

        let entities = store.entities();
        if !entities.is_empty() {
            println!();
            println!("Extracted intelligence:");
            for entity in entities {
                println!("  {}: {}", entity.kind, entity.value);
            }
        }
        Ok(())
    }

    /// Handle the end command
    async fn handle_end_command(app: FlytrapApp, session: String) -> Result<()> {
        let session_id = SessionId::new(session);
        app.coordinator().resume(&session_id).await?;

        let summary = app.coordinator().end().await?;
        println!("Session ended");
        println!("  Total turns: {}", summary.total_turns);
        println!("  Entities extracted: {}", summary.entities_extracted);
        Ok(())
    }

    /// Handle the status command
    async fn handle_status_command(app: FlytrapApp) -> Result<()> {
        let config = app.config();
        println!("Flytrap Configuration");
        println!("=====================");
        println!("Live stream: {}", config.transport.url);
        println!("API: {}", config.api.base_url);
        println!(
            "Reconnect: every {}ms, up to {} attempts",
            config.transport.reconnect_delay_ms, config.transport.max_reconnect_attempts
        );
        println!("History page size: {}", config.api.history_page_size);
        println!("Store cap: {} messages", config.store.max_messages);
        println!();

        println!("Probing live stream...");
        app.connect_live()?;
        if app.wait_for_link(LINK_DEADLINE).await {
            println!("Live stream: reachable");
        } else {
            let stats = app.transport_stats();
            println!(
                "Live stream: unreachable after {} attempts",
                stats.connect_attempts
            );
        }

        app.shutdown().await;
        Ok(())
    }

    /// Handle the console command
    async fn handle_console_command(mut app: FlytrapApp, session: Option<String>) -> Result<()> {
        let console = app.config().console.clone();
        Self::open_link(&app).await?;

        if let Some(session) = session {
            let session_id = SessionId::new(session);
            match app.coordinator().resume(&session_id).await {
                Ok(true) => println!("Resumed session {}", session_id),
                Ok(false) => println!("Session {} already loaded", session_id),
                Err(err) => println!("Could not resume {}: {}", session_id, err),
            }
        }

        {
            let store = app.store();
            let store = store.lock().await;
            let messages = store.messages();
            let skip = messages.len().saturating_sub(console.transcript_window);
            for message in &messages[skip..] {
                Self::print_message(message);
            }
        }
        println!("Commands: /status /entities /retry <id> /end /quit");

        let (mut live, mut notices) = app
            .take_streams()
            .ok_or_else(|| CliError::Console("live streams already taken".to_string()))?;

        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();

        Self::print_prompt(&console.prompt);
        loop {
            tokio::select! {
                frame = live.recv() => {
                    let Some(frame) = frame else { break };
                    match app.coordinator().apply_live(&frame).await {
                        Ok(outcome) => Self::render_live(&frame, outcome),
                        Err(err) => warn!(%err, "failed to fold live frame"),
                    }
                }
                frame = notices.recv() => {
                    let Some(frame) = frame else { break };
                    Self::render_notice(&frame, &console);
                }
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    if !Self::handle_console_line(&app, line.trim()).await {
                        break;
                    }
                    Self::print_prompt(&console.prompt);
                }
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    break;
                }
            }
        }

        app.shutdown().await;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Console internals
    // ------------------------------------------------------------------------

    /// React to one console input line. Returns `false` when the operator
    /// asked to leave.
    async fn handle_console_line(app: &FlytrapApp, line: &str) -> bool {
        match line {
            "" => true,
            "/quit" | "/q" => false,
            "/help" => {
                println!("Commands: /status /entities /retry <id> /end /quit");
                println!("Anything else is relayed as the scammer's next message.");
                true
            }
            "/status" => {
                Self::print_console_status(app).await;
                true
            }
            "/entities" => {
                Self::print_entities(app).await;
                true
            }
            "/end" => {
                match app.coordinator().end().await {
                    Ok(summary) => {
                        println!("Session ended");
                        println!("  Total turns: {}", summary.total_turns);
                        println!("  Entities extracted: {}", summary.entities_extracted);
                    }
                    Err(err) => println!("Could not end session: {}", err),
                }
                true
            }
            _ if line.starts_with("/retry ") => {
                let id = MessageId::new(line.trim_start_matches("/retry ").trim());
                match app.coordinator().retry(&id).await {
                    Ok(_) => Self::print_latest_reply(app).await,
                    Err(err) => println!("Retry failed: {}", err),
                }
                true
            }
            _ if line.starts_with('/') => {
                println!("Unknown command: {} (try /help)", line);
                true
            }
            _ => {
                Self::relay(app, line).await;
                true
            }
        }
    }

    /// Relay a scammer line: starts an engagement if none is active,
    /// continues the current one otherwise.
    async fn relay(app: &FlytrapApp, line: &str) {
        let active = {
            let store = app.store();
            let store = store.lock().await;
            store.active_session_id().cloned()
        };

        match active {
            None => match app.coordinator().start(line, StartOptions::default()).await {
                Ok(session_id) => {
                    println!("Session started: {}", session_id);
                    Self::print_latest_reply(app).await;
                }
                Err(err) => Self::report_send_failure(app, err).await,
            },
            Some(_) => match app.coordinator().send(line).await {
                Ok(_) => Self::print_latest_reply(app).await,
                Err(err) => Self::report_send_failure(app, err).await,
            },
        }
    }

    /// Point the operator at the failed record the store kept visible
    async fn report_send_failure(app: &FlytrapApp, err: FlytrapError) {
        println!("Send failed: {}", err);
        let store = app.store();
        let store = store.lock().await;
        if let Some(failed) = store.messages().iter().rev().find(|m| m.delivery.is_error()) {
            println!("  kept in the log, retry with: /retry {}", failed.id);
        }
    }

    /// Print the newest victim-side reply, if the exchange produced one
    async fn print_latest_reply(app: &FlytrapApp) {
        let store = app.store();
        let store = store.lock().await;
        if let Some(reply) = store
            .messages()
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Victim)
        {
            Self::print_message(reply);
        }
        if store.session().is_some_and(|s| s.winding_down) {
            println!("[session] engagement winding down");
        }
    }

    async fn print_console_status(app: &FlytrapApp) {
        println!("Link: {}", app.link_state());
        let store = app.store();
        let store = store.lock().await;
        match store.session() {
            Some(session) => {
                println!(
                    "Session: {} ({}, {} turns)",
                    session.id, session.status, session.turn_count
                );
                if let Some(risk) = session.risk_level {
                    println!("Risk: {}", risk);
                }
                if session.winding_down {
                    println!("Winding down: yes");
                }
            }
            None => println!("Session: none"),
        }
        let stats = store.stats();
        println!(
            "Store: {} appended, {} merged, {} duplicates, {} rejected",
            stats.appended, stats.merged, stats.duplicates, stats.rejected
        );
        let frames = app.transport_stats();
        println!(
            "Frames: {} received, {} sent, {} dropped, {} malformed",
            frames.frames_received, frames.frames_sent, frames.frames_dropped,
            frames.malformed_frames
        );
    }

    async fn print_entities(app: &FlytrapApp) {
        let store = app.store();
        let store = store.lock().await;
        let entities = store.entities();
        if entities.is_empty() {
            println!("No intelligence extracted yet");
            return;
        }
        for entity in entities {
            println!("  {}: {}", entity.kind, entity.value);
        }
    }

    // ------------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------------

    /// Print a live frame the coordinator just folded into the store.
    ///
    /// Message frames are only echoed when they appended something new;
    /// a merge or duplicate is the stream confirming what the console
    /// already printed.
    fn render_live(frame: &Frame, outcome: Option<AppendOutcome>) {
        match &frame.kind {
            EventKind::MessageReceived | EventKind::MessageSent => {
                if outcome == Some(AppendOutcome::Appended) {
                    if let Ok(live) = frame.decode_payload::<LiveMessage>() {
                        println!("[{}] {}", live.role, live.content);
                    }
                }
            }
            EventKind::SessionStarted | EventKind::SessionUpdated => {
                if let Ok(update) = frame.decode_payload::<SessionUpdatePayload>() {
                    if let Some(status) = update.patch.status {
                        println!("[session] status {}", status);
                    }
                }
            }
            EventKind::SessionEnded => println!("[session] ended by server"),
            EventKind::IntelligenceEntity => {
                if let Ok(payload) = frame.decode_payload::<EntityPayload>() {
                    println!("[intel] {} {}", payload.entity.kind, payload.entity.value);
                }
            }
            EventKind::IntelligenceScam => {
                if let Ok(payload) = frame.decode_payload::<ScamPayload>() {
                    println!(
                        "[intel] scam type {} ({:.0}%)",
                        payload.scam_type,
                        payload.confidence * 100.0
                    );
                }
            }
            EventKind::IntelligenceRisk => {
                if let Ok(payload) = frame.decode_payload::<RiskPayload>() {
                    if let Some(risk) = payload.effective_risk() {
                        println!("[intel] risk {}", risk);
                    }
                }
            }
            _ => {}
        }
    }

    /// Print a link or typing notice
    fn render_notice(frame: &Frame, console: &ConsoleConfig) {
        match &frame.kind {
            EventKind::Connected => println!("[link] connected"),
            EventKind::Disconnected => println!("[link] disconnected"),
            EventKind::Error => {
                if let Ok(payload) = frame.decode_payload::<ErrorPayload>() {
                    println!("[link] {}", payload.message);
                }
            }
            EventKind::TypingStart if console.show_typing => println!("[victim] typing..."),
            _ => {}
        }
    }

    /// Print one transcript line
    fn print_message(message: &Message) {
        let turn = match message.turn {
            Some(turn) => format!("{:>3}", turn),
            None => "  -".to_string(),
        };
        let status = match &message.delivery {
            DeliveryState::Sending => "sending",
            DeliveryState::Sent => "sent",
            DeliveryState::Delivered => "delivered",
            DeliveryState::Error(_) => "FAILED",
        };
        println!(
            "{} [{:9}] {:8} {}",
            turn, status, message.role, message.content
        );
        if let DeliveryState::Error(failure) = &message.delivery {
            println!(
                "      failed: {} (retry with /retry {})",
                failure.message, message.id
            );
        }
    }

    // ------------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------------

    /// Print the console prompt without a trailing newline
    fn print_prompt(prompt: &str) {
        print!("{}", prompt);
        let _ = std::io::stdout().flush();
    }

    /// Connect the live stream and wait briefly for it to come up
    async fn open_link(app: &FlytrapApp) -> Result<()> {
        app.connect_live()?;
        if !app.wait_for_link(LINK_DEADLINE).await {
            warn!("live stream not connected yet, continuing without it");
        }
        Ok(())
    }
}
