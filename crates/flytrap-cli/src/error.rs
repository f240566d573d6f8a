//! Error handling for the Flytrap CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Flytrap error: {0}")]
    Flytrap(#[from] flytrap_core::FlytrapError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Console error: {0}")]
    Console(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
