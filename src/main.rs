//! mcphub - MCP connection manager CLI
//!
#![doc = "mcphub - MCP connection manager CLI"]
#![doc = "Main entry point for the mcphub command-line tool."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcphub::cli::Cli;
use mcphub::commands;
use mcphub::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    tracing::debug!("Running command: {:?}", cli.command);
    let succeeded = commands::mcp::handle_command(cli.command, config).await?;
    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

/// Initialize tracing subscriber with environment filter
///
/// Logs go to stderr so JSON output on stdout stays machine-readable.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "mcphub=debug" } else { "mcphub=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
