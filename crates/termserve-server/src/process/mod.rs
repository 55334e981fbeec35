//! Application service that runs the command as a child process and talks
//! to it over stdin/stdout using [`packet`] framing.

pub mod envelope;
pub mod packet;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use termserve_core::{
    AppService, AppServiceFactory, Download, DownloadMetadata, Frame, ServiceContext, ServiceError, TerminalSize,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use self::envelope::ClientMessage;
use self::packet::{Packet, PacketCodec, PacketError};

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
/// Line the application prints once packet framing begins on stdout.
const READY_MARKER: &[u8] = b"__GANGLION__";

/// Creates a [`ProcessService`] per session.
#[derive(Clone, Debug)]
pub struct ProcessServiceFactory {
    stop_timeout: Duration,
}

impl ProcessServiceFactory {
    pub fn new() -> Self {
        Self {
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// How long `stop` waits for a graceful exit before killing the child.
    pub fn with_stop_timeout(stop_timeout: Duration) -> Self {
        Self { stop_timeout }
    }
}

impl Default for ProcessServiceFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl AppServiceFactory for ProcessServiceFactory {
    fn create(&self, ctx: ServiceContext) -> Result<Arc<dyn AppService>, ServiceError> {
        Ok(Arc::new(ProcessService::new(ctx, self.stop_timeout)))
    }
}

/// A child process speaking the packet protocol on its stdio.
pub struct ProcessService {
    ctx: ServiceContext,
    stop_timeout: Duration,
    stdin: tokio::sync::Mutex<Option<FramedWrite<ChildStdin, PacketCodec>>>,
    child: tokio::sync::Mutex<Option<Child>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl ProcessService {
    pub fn new(ctx: ServiceContext, stop_timeout: Duration) -> Self {
        Self {
            ctx,
            stop_timeout,
            stdin: tokio::sync::Mutex::new(None),
            child: tokio::sync::Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    fn command(&self, size: TerminalSize) -> Command {
        let mut cmd = Command::new("sh");
        let _ = cmd
            .arg("-c")
            .arg(&self.ctx.command)
            .env("COLUMNS", size.width.to_string())
            .env("ROWS", size.height.to_string())
            .env("TEXTUAL_DRIVER", "textual.drivers.web_driver:WebDriver")
            .env("TEXTUAL_FPS", "60")
            .env("TEXTUAL_COLOR_SYSTEM", "truecolor")
            .env("TERM_PROGRAM", "textual")
            .env("TERM_PROGRAM_VERSION", env!("CARGO_PKG_VERSION"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if self.ctx.debug {
            let _ = cmd.env("TEXTUAL_DEBUG", "1");
        }
        cmd
    }

    async fn write(&self, packet: Packet) -> Result<(), ServiceError> {
        let mut stdin = self.stdin.lock().await;
        let writer = stdin.as_mut().ok_or(ServiceError::NotStarted)?;
        writer.send(packet).await.map_err(|e| match e {
            PacketError::Io(io) => ServiceError::Io(io),
            other => ServiceError::Protocol(other.to_string()),
        })
    }

    async fn wait_or_kill(&self, mut child: Child) {
        match tokio::time::timeout(self.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => info!(session_id = %self.ctx.session_id, %status, "application exited"),
            Ok(Err(e)) => warn!(session_id = %self.ctx.session_id, error = %e, "failed waiting for application"),
            Err(_) => {
                warn!(
                    session_id = %self.ctx.session_id,
                    timeout_secs = self.stop_timeout.as_secs(),
                    "application did not exit in time, killing"
                );
                if let Err(e) = child.kill().await {
                    warn!(session_id = %self.ctx.session_id, error = %e, "failed to kill application");
                }
            }
        }
    }
}

#[async_trait]
impl AppService for ProcessService {
    async fn start(&self, size: TerminalSize) -> Result<(), ServiceError> {
        let mut child = self.command(size).spawn().map_err(|source| ServiceError::Spawn {
            command: self.ctx.command.clone(),
            source,
        })?;
        let missing = |pipe: &str| ServiceError::Internal(format!("child {pipe} was not captured"));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        info!(
            session_id = %self.ctx.session_id,
            pid = child.id(),
            width = size.width,
            height = size.height,
            "application started"
        );

        *self.stdin.lock().await = Some(FramedWrite::new(stdin, PacketCodec));
        *self.child.lock().await = Some(child);

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(pump_output(stdout, self.ctx.clone())));
        tasks.push(tokio::spawn(log_stderr(stderr, self.ctx.clone())));
        Ok(())
    }

    async fn send(&self, frame: Frame) -> Result<(), ServiceError> {
        let packet = match frame {
            Frame::Structured(value) => match ClientMessage::parse(&value) {
                Some(ClientMessage::Stdin(data)) => Packet::Data(Bytes::from(data)),
                Some(ClientMessage::Resize { width, height }) => {
                    Packet::Meta(json!({"type": "resize", "width": width, "height": height}))
                }
                Some(ClientMessage::Ping(data)) => {
                    self.ctx.transport.send_json(&json!(["pong", data])).await?;
                    return Ok(());
                }
                Some(ClientMessage::Blur) => Packet::Meta(json!({"type": "blur"})),
                Some(ClientMessage::Focus) => Packet::Meta(json!({"type": "focus"})),
                None => {
                    debug!(session_id = %self.ctx.session_id, envelope = %value, "ignoring unrecognized envelope");
                    return Ok(());
                }
            },
            Frame::Text(text) => Packet::Data(Bytes::from(text)),
            Frame::Binary(data) => Packet::Data(data),
        };
        self.write(packet).await
    }

    async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        // Stdin can be full, or locked by a write still in flight.
        let quit = async {
            if let Some(mut writer) = self.stdin.lock().await.take() {
                writer.send(Packet::Meta(json!({"type": "quit"}))).await
            } else {
                Ok(())
            }
        };
        match tokio::time::timeout(self.stop_timeout, quit).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(session_id = %self.ctx.session_id, error = %e, "could not send quit"),
            Err(_) => debug!(
                session_id = %self.ctx.session_id,
                timeout = ?self.stop_timeout,
                "quit not written in time"
            ),
        }

        let child = self.child.lock().await.take();
        if let Some(child) = child {
            self.wait_or_kill(child).await;
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        let released = self.ctx.downloads.release_session(&self.ctx.session_id);
        if released > 0 {
            debug!(session_id = %self.ctx.session_id, released, "released session downloads");
        }
    }
}

/// Relay application output to the browser until stdout closes, then
/// close the transport and signal that the application has finished.
/// Packets start after the ready marker line; anything printed before it
/// is logged and dropped.
async fn pump_output(stdout: ChildStdout, ctx: ServiceContext) {
    let mut reader = BufReader::new(stdout);
    if skip_to_marker(&mut reader, &ctx).await {
        let mut packets = FramedRead::new(reader, PacketCodec);
        relay_packets(&mut packets, &ctx).await;
    }

    debug!(session_id = %ctx.session_id, "application output ended");
    if let Err(e) = ctx.transport.close().await {
        debug!(session_id = %ctx.session_id, error = %e, "transport close failed");
    }
    ctx.finished.cancel();
}

/// Discard lines up to and including the ready marker. Returns `false`
/// if stdout ended or failed first.
async fn skip_to_marker<R>(reader: &mut R, ctx: &ServiceContext) -> bool
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => {
                debug!(session_id = %ctx.session_id, "stdout closed before ready marker");
                return false;
            }
            Ok(_) if line.trim_ascii_end() == READY_MARKER => return true,
            Ok(_) => debug!(
                session_id = %ctx.session_id,
                line = %String::from_utf8_lossy(line.trim_ascii_end()),
                "application stdout before ready"
            ),
            Err(e) => {
                debug!(session_id = %ctx.session_id, error = %e, "stdout read failed");
                return false;
            }
        }
    }
}

async fn relay_packets<R>(packets: &mut FramedRead<R, PacketCodec>, ctx: &ServiceContext)
where
    R: AsyncRead + Unpin,
{
    while let Some(packet) = packets.next().await {
        let keep_going = match packet {
            Ok(Packet::Data(data)) => ctx.transport.send_binary(data).await.is_ok(),
            Ok(Packet::Meta(meta)) => handle_meta(ctx, &meta).await,
            Ok(Packet::Packed(payload)) => {
                debug!(session_id = %ctx.session_id, len = payload.len(), "ignoring packed packet");
                true
            }
            Err(e) => {
                warn!(session_id = %ctx.session_id, error = %e, "malformed output from application");
                false
            }
        };
        if !keep_going {
            break;
        }
    }
}

/// Act on one meta packet. Returns `false` when output should stop.
async fn handle_meta(ctx: &ServiceContext, meta: &Value) -> bool {
    match meta.get("type").and_then(Value::as_str) {
        Some("exit") => {
            info!(session_id = %ctx.session_id, "application requested exit");
            false
        }
        Some("open_url") => {
            let url = meta.get("url").cloned().unwrap_or(Value::Null);
            let new_tab = meta.get("new_tab").and_then(Value::as_bool).unwrap_or(true);
            ctx.transport
                .send_json(&json!(["open_url", {"url": url, "new_tab": new_tab}]))
                .await
                .is_ok()
        }
        Some("deliver_file_start") => match parse_delivery(meta) {
            Some((key, download)) => {
                ctx.downloads.register(&ctx.session_id, key.clone(), download);
                ctx.transport.send_json(&json!(["deliver_file_start", key])).await.is_ok()
            }
            None => {
                warn!(session_id = %ctx.session_id, meta = %meta, "deliver_file_start without key or path");
                true
            }
        },
        other => {
            debug!(session_id = %ctx.session_id, kind = ?other, "ignoring meta packet");
            true
        }
    }
}

fn parse_delivery(meta: &Value) -> Option<(String, Download)> {
    let text = |field: &str| meta.get(field).and_then(Value::as_str).map(str::to_owned);
    let key = text("key")?;
    let path = PathBuf::from(text("path")?);
    let file_name = text("name").or_else(|| file_name_of(&path))?;
    let metadata = DownloadMetadata {
        file_name,
        mime_type: text("mime_type").unwrap_or_else(|| DEFAULT_MIME_TYPE.to_owned()),
        encoding: text("encoding"),
        open_method: text("open_method").unwrap_or_else(|| "download".to_owned()),
    };
    Some((key, Download { metadata, path }))
}

fn file_name_of(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

async fn log_stderr(stderr: ChildStderr, ctx: ServiceContext) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(session_id = %ctx.session_id, line = %line, "application stderr"),
            Ok(None) => break,
            Err(e) => {
                debug!(session_id = %ctx.session_id, error = %e, "stderr read failed");
                break;
            }
        }
    }
}
