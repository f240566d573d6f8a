//! Flytrap CLI library
//!
//! This library provides the components for the Flytrap operator console:
//! application wiring, command handlers, and layered configuration.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use app::FlytrapApp;
pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::AppConfig;
pub use error::{CliError, Result};

// Re-export commonly used types
pub use flytrap_core::{LinkState, Message, MessageRole, Session, SessionId, SessionStatus};
