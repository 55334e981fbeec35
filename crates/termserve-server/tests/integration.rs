//! End-to-end tests against a real listener, WebSocket client and HTTP client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use termserve_core::mock::{MemoryDownloads, MockBehavior, MockService, MockServiceFactory};
use termserve_core::{DownloadMetadata, TerminalSize};
use termserve_server::{ServerConfig, ServerHandle, TermServer};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    handle: ServerHandle,
    factory: Arc<MockServiceFactory>,
    downloads: Arc<MemoryDownloads>,
}

impl TestServer {
    fn addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    fn http(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr())
    }

    async fn connect(&self, query: &str) -> WsStream {
        let url = format!("ws://{}/ws{query}", self.addr());
        let (ws, _) = timeout(TIMEOUT, connect_async(url)).await.unwrap().unwrap();
        ws
    }

    /// The service behind the most recent session, once it exists.
    async fn service(&self) -> Arc<MockService> {
        timeout(TIMEOUT, async {
            loop {
                if let Some(service) = self.factory.last() {
                    if service.start_calls() > 0 {
                        return service;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }
}

/// Boot a server on an auto-assigned port.
async fn boot_server(behavior: MockBehavior) -> TestServer {
    let factory = Arc::new(MockServiceFactory::new(behavior));
    let downloads = Arc::new(MemoryDownloads::new());
    let config = ServerConfig {
        port: 0,
        title: "Integration".into(),
        shutdown_timeout_secs: 2,
        ..ServerConfig::with_command("demo-app")
    };
    let server = Arc::new(TermServer::new(config, factory.clone(), downloads.clone()));
    let handle = server.listen().await.unwrap();
    TestServer {
        handle,
        factory,
        downloads,
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(TIMEOUT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

/// Read until the server closes the socket. Returns the data frames seen on the way.
async fn drain_until_closed(ws: &mut WsStream) -> Vec<Message> {
    let mut seen = Vec::new();
    timeout(TIMEOUT, async {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(msg) => seen.push(msg),
            }
        }
    })
    .await
    .unwrap();
    seen
}

// ── Sessions ──

#[tokio::test]
async fn ws_relays_frames_both_ways() {
    let server = boot_server(MockBehavior {
        echo: true,
        ..MockBehavior::default()
    })
    .await;
    let mut ws = server.connect("?width=120&height=abc").await;
    let service = server.service().await;
    assert_eq!(service.size(), Some(TerminalSize::new(120, 24)));
    assert_eq!(service.command(), "demo-app");

    ws.send(Message::Text(r#"["stdin","ls\r"]"#.into())).await.unwrap();
    let reply = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
    let reply: Value = serde_json::from_str(reply.to_text().unwrap()).unwrap();
    assert_eq!(reply, json!(["stdin", "ls\r"]));

    ws.send(Message::Binary(Bytes::from_static(b"\x1b[A"))).await.unwrap();
    let reply = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(reply, Message::Binary(Bytes::from_static(b"\x1b[A")));

    ws.close(None).await.unwrap();
    eventually(|| service.stop_calls() == 1).await;
    assert_eq!(service.start_calls(), 1);

    server.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn ws_without_size_uses_defaults() {
    let server = boot_server(MockBehavior::default()).await;
    let _ws = server.connect("").await;
    let service = server.service().await;
    assert_eq!(service.size(), Some(TerminalSize::new(80, 24)));
    server.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn ws_closed_when_application_finishes() {
    let server = boot_server(MockBehavior {
        finish_after: Some(1),
        ..MockBehavior::default()
    })
    .await;
    let mut ws = server.connect("?width=100&height=30").await;
    let service = server.service().await;

    ws.send(Message::Text("q".into())).await.unwrap();
    let _ = drain_until_closed(&mut ws).await;
    eventually(|| service.stop_calls() == 1).await;

    server.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn ws_start_failure_still_stops_once() {
    let server = boot_server(MockBehavior {
        fail_start: true,
        ..MockBehavior::default()
    })
    .await;
    let mut ws = server.connect("").await;
    let service = server.service().await;

    let seen = drain_until_closed(&mut ws).await;
    assert!(seen.is_empty());
    eventually(|| service.stop_calls() == 1).await;

    server.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn sessions_are_independent() {
    let server = boot_server(MockBehavior {
        echo: true,
        ..MockBehavior::default()
    })
    .await;
    let mut first = server.connect("?width=90").await;
    let mut second = server.connect("?width=91").await;
    eventually(|| server.factory.services().len() == 2).await;

    second.send(Message::Text("two".into())).await.unwrap();
    first.send(Message::Text("one".into())).await.unwrap();

    let reply = timeout(TIMEOUT, first.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(reply.to_text().unwrap(), "one");
    let reply = timeout(TIMEOUT, second.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(reply.to_text().unwrap(), "two");

    server.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_closes_open_sessions() {
    let server = boot_server(MockBehavior::default()).await;
    let mut ws = server.connect("").await;
    let service = server.service().await;
    let factory = Arc::clone(&server.factory);

    timeout(TIMEOUT, server.handle.shutdown()).await.unwrap().unwrap();
    let _ = drain_until_closed(&mut ws).await;
    assert_eq!(service.stop_calls(), 1);
    assert_eq!(factory.services().len(), 1);
}

// ── HTTP ──

#[tokio::test]
async fn index_page_carries_urls() {
    let server = boot_server(MockBehavior::default()).await;
    let resp = reqwest::get(server.http("/?fontsize=18")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let html = resp.text().await.unwrap();
    let addr = server.addr();
    assert!(html.contains("<title>Integration</title>"));
    assert!(html.contains(&format!(r#"data-session-websocket-url="ws://{addr}/ws""#)));
    assert!(html.contains(r#"data-font-size="18""#));
    assert!(html.contains(&format!("http://{addr}/static/css/xterm.css")));

    server.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn download_streams_registered_file() {
    let server = boot_server(MockBehavior::default()).await;
    let metadata = DownloadMetadata {
        file_name: "notes.txt".into(),
        mime_type: "text/plain".into(),
        encoding: Some("utf-8".into()),
        open_method: "browser".into(),
    };
    let chunks = (0..100).map(|i| Bytes::from(format!("line {i}\n"))).collect();
    server.downloads.insert("abc/notes", metadata, chunks);

    let resp = reqwest::get(server.http("/download/abc/notes")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "text/plain; charset=utf-8");
    assert_eq!(resp.headers()["content-disposition"], "inline; filename=notes.txt");

    let body = resp.text().await.unwrap();
    let expected: String = (0..100).map(|i| format!("line {i}\n")).collect();
    assert_eq!(body, expected);

    server.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn download_unknown_key_is_404() {
    let server = boot_server(MockBehavior::default()).await;
    let resp = reqwest::get(server.http("/download/missing-key")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    let body = resp.text().await.unwrap();
    assert!(body.contains("missing-key"));
    assert_eq!(server.downloads.download_calls(), 0);

    server.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn download_failure_mid_stream_aborts_response() {
    let server = boot_server(MockBehavior::default()).await;
    let metadata = DownloadMetadata {
        file_name: "big.bin".into(),
        mime_type: "application/octet-stream".into(),
        encoding: None,
        open_method: "download".into(),
    };
    let chunks = (0..10).map(|_| Bytes::from(vec![7u8; 1024])).collect();
    server.downloads.insert_failing("big", metadata, chunks, 3);

    let resp = reqwest::get(server.http("/download/big")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert!(resp.bytes().await.is_err());

    server.handle.shutdown().await.unwrap();
}
