//! HTTP surface: routing generic over a [`Handlers`] implementation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{OriginalUri, Path as UrlPath, Query, State};
use axum::http::{HeaderMap, Uri};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use termserve_core::{to_positive_int, TerminalSize};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::bootstrap::DEFAULT_FONT_SIZE;
use crate::urls::{self, STATIC_PATH, WS_PATH};

type QueryParams = Query<HashMap<String, String>>;

/// What the router delegates to once parameters are extracted.
#[async_trait]
pub trait Handlers: Send + Sync + 'static {
    /// Render the bootstrap page for the given external base URL.
    async fn render_index(&self, base_url: String, font_size: u32) -> Response;

    /// Stream the download registered under `key`.
    async fn handle_download(&self, key: String) -> Response;

    /// Run a session over an accepted WebSocket.
    async fn handle_websocket(&self, socket: WebSocket, size: TerminalSize);

    /// Largest inbound WebSocket message accepted.
    fn max_message_size(&self) -> usize;
}

/// Build the router: `/`, `/ws`, `/download/{*key}` and the static mount.
pub fn build_router<H: Handlers>(handlers: Arc<H>, static_dir: &Path) -> Router {
    Router::new()
        .route("/", get(index::<H>))
        .route(WS_PATH, get(websocket::<H>))
        .route("/download/{*key}", get(download::<H>))
        .nest_service(STATIC_PATH, ServeDir::new(static_dir))
        .with_state(handlers)
        .layer(TraceLayer::new_for_http())
}

/// GET /: the bootstrap page.
async fn index<H: Handlers>(
    State(handlers): State<Arc<H>>,
    OriginalUri(original): OriginalUri,
    uri: Uri,
    headers: HeaderMap,
    Query(params): QueryParams,
) -> Response {
    let base_url = urls::base_url(&headers, &original, &uri);
    let font_size = to_positive_int(params.get("fontsize").map(String::as_str), DEFAULT_FONT_SIZE);
    handlers.render_index(base_url, font_size).await
}

/// GET /ws: upgrade and hand the socket to a session.
async fn websocket<H: Handlers>(
    State(handlers): State<Arc<H>>,
    Query(params): QueryParams,
    ws: WebSocketUpgrade,
) -> Response {
    let size = TerminalSize::from_query(
        params.get("width").map(String::as_str),
        params.get("height").map(String::as_str),
    );
    ws.max_message_size(handlers.max_message_size())
        .on_failed_upgrade(|e| debug!(error = %e, "websocket handshake failed"))
        .on_upgrade(move |socket| async move { handlers.handle_websocket(socket, size).await })
}

/// GET /download/{*key}
async fn download<H: Handlers>(State(handlers): State<Arc<H>>, UrlPath(key): UrlPath<String>) -> Response {
    handlers.handle_download(key).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::IntoResponse;
    use parking_lot::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct Recorder {
        index: Mutex<Vec<(String, u32)>>,
        keys: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Handlers for Recorder {
        async fn render_index(&self, base_url: String, font_size: u32) -> Response {
            self.index.lock().push((base_url, font_size));
            "index".into_response()
        }

        async fn handle_download(&self, key: String) -> Response {
            self.keys.lock().push(key);
            StatusCode::NO_CONTENT.into_response()
        }

        async fn handle_websocket(&self, _socket: WebSocket, _size: TerminalSize) {}

        fn max_message_size(&self) -> usize {
            1024
        }
    }

    fn router(recorder: &Arc<Recorder>) -> Router {
        build_router(Arc::clone(recorder), Path::new("static"))
    }

    async fn status_of(app: Router, uri: &str, host: &str) -> StatusCode {
        let req = Request::builder()
            .uri(uri)
            .header("host", host)
            .body(Body::empty())
            .unwrap();
        app.oneshot(req).await.unwrap().status()
    }

    #[tokio::test]
    async fn index_receives_base_url_and_font_size() {
        let recorder = Arc::new(Recorder::default());
        assert_eq!(status_of(router(&recorder), "/?fontsize=20", "example.com:8000").await, StatusCode::OK);
        assert_eq!(status_of(router(&recorder), "/?fontsize=big", "example.com").await, StatusCode::OK);
        assert_eq!(status_of(router(&recorder), "/", "example.com").await, StatusCode::OK);

        assert_eq!(
            *recorder.index.lock(),
            vec![
                ("http://example.com:8000".to_string(), 20),
                ("http://example.com".to_string(), 16),
                ("http://example.com".to_string(), 16),
            ]
        );
    }

    #[tokio::test]
    async fn index_under_a_nested_prefix() {
        let recorder = Arc::new(Recorder::default());
        let app = Router::new().nest("/apps/demo", router(&recorder));
        assert_eq!(status_of(app, "/apps/demo?fontsize=12", "h:1").await, StatusCode::OK);
        assert_eq!(*recorder.index.lock(), vec![("http://h:1/apps/demo".to_string(), 12)]);
    }

    #[tokio::test]
    async fn download_key_keeps_slashes() {
        let recorder = Arc::new(Recorder::default());
        let status = status_of(router(&recorder), "/download/abc/def.txt", "h").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(*recorder.keys.lock(), vec!["abc/def.txt".to_string()]);
    }

    #[tokio::test]
    async fn ws_without_upgrade_is_rejected() {
        let recorder = Arc::new(Recorder::default());
        let status = status_of(router(&recorder), "/ws?width=100", "h").await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let recorder = Arc::new(Recorder::default());
        assert_eq!(status_of(router(&recorder), "/nonexistent", "h").await, StatusCode::NOT_FOUND);
    }
}
