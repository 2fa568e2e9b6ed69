//! CDP browser session: a thin client over `tokio-tungstenite`.
//!
//! Only implements the CDP commands the collector needs (not the entire
//! protocol). Responses are correlated by command id; events are mapped
//! onto [`ChannelEvent`] and fanned out on a broadcast channel.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::channel::{ContextId, ControlChannel, EvaluateRequest, Evaluation};
use crate::error::ChannelError;
use crate::events::ChannelEvent;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Pending CDP command waiting for response.
type PendingTx = oneshot::Sender<Result<Value, String>>;

/// Capacity of the event fan-out channel.
const EVENT_CAPACITY: usize = 1024;

/// Internal CDP command message.
struct CdpCommand {
    method: String,
    params: Value,
    response_tx: PendingTx,
}

/// Options for launching a local Chrome.
#[derive(Clone, Debug)]
pub struct LaunchOptions {
    /// Run without a visible window.
    pub headless: bool,
    /// Per-command response timeout.
    pub command_timeout: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// A CDP session attached to a single page target.
pub struct CdpSession {
    cmd_tx: mpsc::Sender<CdpCommand>,
    events: broadcast::Sender<ChannelEvent>,
    command_timeout: Duration,
    chrome_process: Mutex<Option<Child>>,
    _handler: JoinHandle<()>,
}

impl CdpSession {
    /// Launch Chrome and attach to its first page.
    pub async fn launch(chrome_path: &Path, opts: LaunchOptions) -> Result<Self, ChannelError> {
        // Find a free port
        let listener = std::net::TcpListener::bind("127.0.0.1:0").map_err(|e| {
            ChannelError::LaunchFailed {
                context: format!("bind port: {e}"),
            }
        })?;
        let port = listener
            .local_addr()
            .map_err(|e| ChannelError::LaunchFailed {
                context: format!("local_addr: {e}"),
            })?
            .port();
        drop(listener);

        let profile_dir = std::env::temp_dir().join(format!("cmpscan-profile-{port}"));

        let mut command = Command::new(chrome_path);
        if opts.headless {
            let _ = command.arg("--headless=new");
        }
        let mut child = command
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg(format!("--user-data-dir={}", profile_dir.display()))
            .arg(format!("--remote-debugging-port={port}"))
            .arg("--window-size=1280,800")
            .arg("about:blank")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ChannelError::LaunchFailed {
                context: e.to_string(),
            })?;

        let ws_url = wait_for_ws_url(port, &mut child).await?;
        let session = Self::connect(&ws_url, opts.command_timeout).await?;
        *session.chrome_process.lock().await = Some(child);
        Ok(session)
    }

    /// Attach to an already running page target.
    pub async fn connect(ws_url: &str, command_timeout: Duration) -> Result<Self, ChannelError> {
        tracing::info!(url = ws_url, "connecting to Chrome DevTools WebSocket");
        let (ws, _) = connect_async(ws_url)
            .await
            .map_err(|e| ChannelError::LaunchFailed {
                context: format!("WebSocket connect: {e}"),
            })?;

        let (cmd_tx, cmd_rx) = mpsc::channel::<CdpCommand>(64);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let handler = tokio::spawn(cdp_handler_loop(ws, cmd_rx, events.clone()));

        Ok(Self {
            cmd_tx,
            events,
            command_timeout,
            chrome_process: Mutex::new(None),
            _handler: handler,
        })
    }

    // ─── CDP command helper ──────────────────────────────────────────────

    async fn send_cdp(&self, method: &str, params: Value) -> Result<Value, ChannelError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(CdpCommand {
                method: method.into(),
                params,
                response_tx: tx,
            })
            .await
            .map_err(|_| ChannelError::Closed)?;

        #[allow(clippy::cast_possible_truncation)]
        let timeout_ms = self.command_timeout.as_millis() as u64;
        let result = tokio::time::timeout(self.command_timeout, rx)
            .await
            .map_err(|_| ChannelError::Timeout {
                timeout_ms,
                context: format!("CDP {method}"),
            })?
            .map_err(|_| ChannelError::Closed)?;

        result.map_err(ChannelError::Cdp)
    }

    // ─── Navigation ──────────────────────────────────────────────────────

    /// Navigate to `url` and wait (up to `load_timeout`) for the load event.
    ///
    /// A missing load event is logged, not an error: slow pages still get
    /// scanned.
    pub async fn navigate(&self, url: &str, load_timeout: Duration) -> Result<(), ChannelError> {
        let mut events = self.events.subscribe();
        let result = self
            .send_cdp("Page.navigate", json!({ "url": url }))
            .await
            .map_err(|e| ChannelError::NavigationFailed {
                url: url.into(),
                reason: e.to_string(),
            })?;
        if let Some(reason) = result["errorText"].as_str().filter(|t| !t.is_empty()) {
            return Err(ChannelError::NavigationFailed {
                url: url.into(),
                reason: reason.into(),
            });
        }

        let loaded = tokio::time::timeout(load_timeout, async {
            loop {
                match events.recv().await {
                    Ok(ChannelEvent::PageLoaded) => return true,
                    Ok(ChannelEvent::Detached) | Err(broadcast::error::RecvError::Closed) => {
                        return false;
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                }
            }
        })
        .await;
        match loaded {
            Ok(true) => tracing::debug!(url, "page loaded"),
            Ok(false) => return Err(ChannelError::Closed),
            Err(_) => tracing::warn!(url, ?load_timeout, "load event not seen, continuing"),
        }
        Ok(())
    }

    /// Kill the browser process (if this session launched one).
    pub async fn close(&self) -> Result<(), ChannelError> {
        let _ = self.send_cdp("Browser.close", json!({})).await;
        if let Some(mut child) = self.chrome_process.lock().await.take() {
            let _ = child.kill().await;
        }
        Ok(())
    }
}

#[async_trait]
impl ControlChannel for CdpSession {
    async fn enable(&self) -> Result<(), ChannelError> {
        let _ = self.send_cdp("Page.enable", json!({})).await?;
        let _ = self.send_cdp("Runtime.enable", json!({})).await?;
        Ok(())
    }

    async fn add_binding(&self, name: &str, world_name: &str) -> Result<(), ChannelError> {
        let _ = self
            .send_cdp(
                "Runtime.addBinding",
                json!({ "name": name, "executionContextName": world_name }),
            )
            .await?;
        Ok(())
    }

    async fn create_isolated_world(
        &self,
        frame_id: &str,
        world_name: &str,
    ) -> Result<ContextId, ChannelError> {
        let result = self
            .send_cdp(
                "Page.createIsolatedWorld",
                json!({ "frameId": frame_id, "worldName": world_name }),
            )
            .await?;
        result["executionContextId"]
            .as_i64()
            .map(ContextId)
            .ok_or_else(|| ChannelError::Protocol("createIsolatedWorld: no executionContextId".into()))
    }

    async fn evaluate(&self, request: EvaluateRequest) -> Result<Evaluation, ChannelError> {
        let result = self.send_cdp("Runtime.evaluate", request.to_params()).await?;
        Ok(Evaluation::from_cdp(&result))
    }

    async fn frame_ids(&self) -> Result<Vec<String>, ChannelError> {
        let result = self.send_cdp("Page.getFrameTree", json!({})).await?;
        let mut ids = Vec::new();
        collect_frame_ids(&result["frameTree"], &mut ids);
        Ok(ids)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }
}

/// Flatten a `Page.getFrameTree` tree into frame ids, parents first.
pub fn collect_frame_ids(tree: &Value, out: &mut Vec<String>) {
    if let Some(id) = tree["frame"]["id"].as_str() {
        out.push(id.to_string());
    }
    if let Some(children) = tree["childFrames"].as_array() {
        for child in children {
            collect_frame_ids(child, out);
        }
    }
}

/// Wait for Chrome to accept `DevTools` connections, then query the `/json`
/// endpoint for the first page's WebSocket URL.
async fn wait_for_ws_url(port: u16, child: &mut Child) -> Result<String, ChannelError> {
    let url = format!("http://127.0.0.1:{port}/json");

    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;

        if let Some(status) = child.try_wait().map_err(|e| ChannelError::LaunchFailed {
            context: format!("wait: {e}"),
        })? {
            return Err(ChannelError::LaunchFailed {
                context: format!("Chrome exited early with {status}"),
            });
        }

        let Ok(resp) = reqwest::get(&url).await else {
            continue;
        };
        let Ok(targets): Result<Vec<Value>, _> = resp.json().await else {
            continue;
        };
        if let Some(ws_url) = first_page_ws_url(&targets) {
            return Ok(ws_url);
        }
    }

    Err(ChannelError::LaunchFailed {
        context: format!("Chrome did not start within 5 seconds on port {port}"),
    })
}

/// WebSocket URL of the first `page` target in a `/json` listing.
fn first_page_ws_url(targets: &[Value]) -> Option<String> {
    targets
        .iter()
        .filter(|t| t["type"].as_str().is_none_or(|kind| kind == "page"))
        .find_map(|t| t["webSocketDebuggerUrl"].as_str().map(String::from))
}

/// CDP WebSocket handler loop.
///
/// Sends commands from [`CdpSession`] over the socket, routes responses back
/// to their callers and broadcasts events. When the socket closes, pending
/// callers see their response channel dropped and subscribers get
/// [`ChannelEvent::Detached`].
async fn cdp_handler_loop(
    ws: WsStream,
    mut cmd_rx: mpsc::Receiver<CdpCommand>,
    events: broadcast::Sender<ChannelEvent>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut pending: HashMap<u64, PendingTx> = HashMap::new();
    let mut next_id: u64 = 1;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                let id = next_id;
                next_id += 1;
                let msg = json!({
                    "id": id,
                    "method": cmd.method,
                    "params": cmd.params,
                });
                let _ = pending.insert(id, cmd.response_tx);
                if ws_tx.send(Message::Text(msg.to_string().into())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                let Message::Text(text) = msg else { continue };
                let Ok(val): Result<Value, _> = serde_json::from_str(&text) else {
                    tracing::debug!("dropping non-JSON CDP frame");
                    continue;
                };
                if let Some(id) = val.get("id").and_then(Value::as_u64) {
                    if let Some(tx) = pending.remove(&id) {
                        if let Some(err) = val.get("error") {
                            let msg = err["message"].as_str().unwrap_or("CDP error");
                            let _ = tx.send(Err(msg.into()));
                        } else {
                            let _ = tx.send(Ok(val["result"].clone()));
                        }
                    }
                } else if let Some(method) = val.get("method").and_then(Value::as_str) {
                    if let Some(event) = ChannelEvent::from_cdp(method, &val["params"]) {
                        // no subscribers is fine
                        let _ = events.send(event);
                    }
                }
            }
        }
    }

    tracing::debug!(pending = pending.len(), "CDP connection closed");
    let _ = events.send(ChannelEvent::Detached);
}
