//! Shared types and collaborator traits for the termserve bridge.
//!
//! The server crate owns the session lifecycle; everything it talks to
//! (the running application, the browser transport, the download store)
//! is described here as a trait so each side can be swapped for tests.

pub mod download;
pub mod frame;
pub mod ids;
pub mod params;
pub mod service;
pub mod transport;

pub mod mock;

pub use download::{ByteStream, Download, DownloadError, DownloadManager, DownloadMetadata};
pub use frame::Frame;
pub use ids::SessionId;
pub use params::{to_positive_int, TerminalSize};
pub use service::{AppService, AppServiceFactory, ServiceContext, ServiceError};
pub use transport::{Transport, TransportError};
