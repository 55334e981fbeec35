//! Server configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the termserve server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `8000`, `0` for auto-assign).
    pub port: u16,
    /// Shell command line that runs the terminal application.
    pub command: String,
    /// Page title shown in the browser.
    pub title: String,
    /// Verbose logging. Has no other effect on behavior.
    pub debug: bool,
    /// Directory served under `/static`.
    pub static_dir: PathBuf,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// How long shutdown waits for open sessions to finish.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            command: String::new(),
            title: "termserve".into(),
            debug: false,
            static_dir: PathBuf::from("static"),
            max_message_size: 16 * 1024 * 1024, // 16 MB
            shutdown_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    /// Configuration that runs `command` with everything else defaulted.
    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
