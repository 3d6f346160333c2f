//! wsman-shell - run a command on a Windows host over WS-Management
//!
//! Prints the remote stdout and stderr and exits with the remote exit code.

mod cli;

use std::io::Write;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wsman_shell::Session;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = cli
        .session_config()
        .context("invalid session configuration")?;
    let endpoint = config.endpoint_url();
    let request = cli.command_request(&config);
    let session = Session::new(config).context("failed to set up session")?;

    let cancel = CancellationToken::new();
    let interrupted = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cleaning up remote shell");
            interrupted.cancel();
        }
    });

    let response = session
        .run(request, &cancel)
        .await
        .with_context(|| format!("command failed on {}", endpoint))?;

    debug!(%response, "Remote command finished");

    std::io::stdout().write_all(response.stdout.as_bytes())?;
    std::io::stderr().write_all(response.stderr.as_bytes())?;

    std::process::exit(response.exit_code);
}

/// Initialize logging based on verbosity level
fn init_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(verbosity >= 3))
        .with(env_filter)
        .init();
}
