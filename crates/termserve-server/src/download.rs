//! Streaming HTTP responses for files offered by the application.

use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use termserve_core::{DownloadError, DownloadManager, DownloadMetadata};
use tracing::{debug, error, warn};

/// `Content-Type` for a download: the MIME type, plus a charset when known.
pub fn content_type(metadata: &DownloadMetadata) -> String {
    match metadata.encoding.as_deref() {
        Some(encoding) if !encoding.is_empty() => format!("{}; charset={encoding}", metadata.mime_type),
        _ => metadata.mime_type.clone(),
    }
}

/// `Content-Disposition` for a download. The file name is not escaped.
pub fn content_disposition(metadata: &DownloadMetadata) -> String {
    let disposition = if metadata.opens_in_browser() {
        "inline"
    } else {
        "attachment"
    };
    format!("{disposition}; filename={}", metadata.file_name)
}

/// Resolve `key` and stream the file, or answer 404.
///
/// Chunks are pulled from the manager only as the client reads them. An
/// error mid-stream aborts the response; bytes already sent stay sent.
pub async fn handle_download(downloads: &Arc<dyn DownloadManager>, key: &str) -> Response {
    let metadata = match downloads.metadata(key).await {
        Ok(metadata) => metadata,
        Err(DownloadError::NotFound(_)) => {
            debug!(key, "download key not found");
            return not_found(key);
        }
        Err(e) => {
            error!(key, error = %e, "download metadata lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let headers = (
        HeaderValue::from_bytes(content_type(&metadata).as_bytes()),
        HeaderValue::from_bytes(content_disposition(&metadata).as_bytes()),
    );
    let (content_type, disposition) = match headers {
        (Ok(ct), Ok(cd)) => (ct, cd),
        _ => {
            error!(key, file_name = %metadata.file_name, "download metadata is not a valid header value");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let owned_key = key.to_owned();
    let chunks = downloads.download(key).inspect_err(move |e| {
        warn!(key = %owned_key, error = %e, "download stream failed, aborting response");
    });

    let mut response = Response::new(Body::from_stream(chunks));
    let _ = response.headers_mut().insert(CONTENT_TYPE, content_type);
    let _ = response.headers_mut().insert(CONTENT_DISPOSITION, disposition);
    response
}

fn not_found(key: &str) -> Response {
    (StatusCode::NOT_FOUND, format!("Download with key '{key}' not found")).into_response()
}
