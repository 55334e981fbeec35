//! # termserve-server
//!
//! HTTP + WebSocket front end that bridges browser terminals to
//! application processes.
//!
//! - `GET /`: bootstrap page carrying the WebSocket and static URLs
//! - `GET /ws`: one session per socket, relayed to a fresh application
//! - `GET /download/{*key}`: streamed file downloads offered by the application
//! - `/static`: client assets

pub mod bootstrap;
pub mod config;
pub mod download;
pub mod file_downloads;
pub mod process;
pub mod routes;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod urls;

pub use config::ServerConfig;
pub use file_downloads::FileDownloads;
pub use process::ProcessServiceFactory;
pub use routes::{build_router, Handlers};
pub use server::{ServerHandle, TermServer};
pub use session::{SessionBridge, SessionError, SessionOutcome};
pub use shutdown::ShutdownCoordinator;
