//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Open the interactive engagement console
    Console {
        /// Resume an existing session by id
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Start a new engagement with a scammer's opening message
    Start {
        /// The scammer's message
        message: String,
        /// Where the message came from (sms, whatsapp, email, ...)
        #[arg(long)]
        source: Option<String>,
        /// Persona the honeypot should use
        #[arg(short, long)]
        persona: Option<String>,
    },
    /// Relay one scammer message into an existing session
    Send {
        /// Session to continue
        #[arg(short, long)]
        session: String,
        /// Message content
        message: String,
    },
    /// Hydrate an existing session from the server and show where it stands
    Resume {
        /// Session to resume
        session: String,
    },
    /// Print the transcript of an existing session
    Transcript {
        /// Session to fetch
        session: String,
    },
    /// End a session and print its summary
    End {
        /// Session to end
        session: String,
    },
    /// Show the effective configuration
    Status,
    /// Print an example configuration file
    ExampleConfig,
}
