//! Flytrap CLI - operator console entry point

use clap::Parser;
use tracing::error;

use flytrap_cli::{
    app::FlytrapApp,
    cli::{Cli, Commands},
    commands::CommandDispatcher,
    config::AppConfig,
    error::Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Print the example config before any wiring happens
    if matches!(cli.command, Commands::ExampleConfig) {
        println!("{}", AppConfig::example_config());
        return Ok(());
    }

    // Initialize logging
    setup_logging(cli.verbose);

    // Load configuration
    let config = AppConfig::load(cli.config.as_deref())?;

    // Create application
    let app = FlytrapApp::new(config)?;

    // Execute the command
    if let Err(e) = CommandDispatcher::execute(cli, app).await {
        error!("Command execution failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
