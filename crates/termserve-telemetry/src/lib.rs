//! Logging setup for termserve binaries and tests.

mod capture;

pub use capture::{capture_logs, CapturedEvent, CapturedLogs};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// How the global subscriber is built.
#[derive(Clone, Debug, Default)]
pub struct TelemetryConfig {
    /// Raise the default level from `info` to `debug`. `RUST_LOG` still wins.
    pub debug: bool,
    /// Emit one JSON object per line instead of compact text.
    pub json: bool,
}

impl TelemetryConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    pub fn default_directive(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info"
        }
    }
}

/// Install the global subscriber, writing to stderr.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(filter))
        .try_init()
        .is_ok()
}
