//! # termserve
//!
//! Serve a terminal application to the browser: every WebSocket session
//! runs its own copy of the command.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use termserve_server::{FileDownloads, ProcessServiceFactory, ServerConfig, TermServer};
use termserve_telemetry::{init_telemetry, TelemetryConfig};

/// Serve a terminal application over HTTP and WebSocket.
#[derive(Parser, Debug)]
#[command(name = "termserve", version, about = "Serve a terminal application in the browser")]
struct Cli {
    /// Command line that runs the application, executed with `sh -c`.
    #[arg(env = "TERMSERVE_COMMAND")]
    command: String,

    /// Host to bind.
    #[arg(long, env = "TERMSERVE_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to bind (0 for auto-assign).
    #[arg(long, env = "TERMSERVE_PORT", default_value = "8000")]
    port: u16,

    /// Page title shown in the browser.
    #[arg(long, env = "TERMSERVE_TITLE")]
    title: Option<String>,

    /// Directory served under `/static`.
    #[arg(long, env = "TERMSERVE_STATIC_DIR", default_value = "static")]
    static_dir: PathBuf,

    /// Verbose logging; also sets `TEXTUAL_DEBUG` for the application.
    #[arg(long, env = "TERMSERVE_DEBUG")]
    debug: bool,

    /// Log as JSON lines instead of compact text.
    #[arg(long, env = "TERMSERVE_LOG_JSON")]
    log_json: bool,

    /// Seconds to wait for sessions to end on shutdown.
    #[arg(long, env = "TERMSERVE_SHUTDOWN_TIMEOUT", default_value = "10")]
    shutdown_timeout: u64,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        let defaults = ServerConfig::default();
        ServerConfig {
            title: self.title.unwrap_or_else(|| self.command.clone()),
            host: self.host,
            port: self.port,
            command: self.command,
            debug: self.debug,
            static_dir: self.static_dir,
            shutdown_timeout_secs: self.shutdown_timeout,
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let _ = init_telemetry(&TelemetryConfig {
        debug: args.debug,
        json: args.log_json,
    });

    if args.command.trim().is_empty() {
        bail!("no application command given");
    }
    let config = args.into_config();
    if !config.static_dir.is_dir() {
        tracing::warn!(path = %config.static_dir.display(), "static directory not found, assets will 404");
    }

    let server = Arc::new(TermServer::new(
        config,
        Arc::new(ProcessServiceFactory::new()),
        Arc::new(FileDownloads::new()),
    ));
    let handle = Arc::clone(&server)
        .listen()
        .await
        .context("Failed to bind server")?;

    tracing::info!("termserve listening on http://{}", handle.local_addr());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    handle.shutdown().await.context("Server did not shut down cleanly")?;

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["termserve", "python -m app"]);
        assert_eq!(cli.host, "127.0.0.1");
        assert_eq!(cli.port, 8000);
        assert!(!cli.debug);

        let config = cli.into_config();
        assert_eq!(config.command, "python -m app");
        assert_eq!(config.title, "python -m app");
        assert_eq!(config.shutdown_timeout_secs, 10);
        assert_eq!(config.max_message_size, ServerConfig::default().max_message_size);
    }

    #[test]
    fn cli_overrides() {
        let cli = Cli::parse_from([
            "termserve",
            "htop",
            "--host",
            "0.0.0.0",
            "--port",
            "9000",
            "--title",
            "Monitor",
            "--debug",
        ]);
        let config = cli.into_config();
        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
        assert_eq!(config.title, "Monitor");
        assert!(config.debug);
    }

    #[test]
    fn cli_requires_command() {
        assert!(Cli::try_parse_from(["termserve"]).is_err());
    }
}
