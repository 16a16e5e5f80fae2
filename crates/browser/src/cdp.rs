//! Low-level Chrome DevTools Protocol (CDP) client over WebSocket.
//!
//! One client per endpoint: the browser-level endpoint manages targets, each
//! page target gets its own connection for DOM/Runtime/Input commands.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};
use wabridge_core::{Error, Result};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
/// Scroll-and-collect scripts can run for minutes on long lists.
const EVALUATE_TIMEOUT: Duration = Duration::from_secs(600);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

pub struct CdpClient {
    /// Sender to write messages to the WebSocket.
    ws_tx: mpsc::Sender<String>,
    /// Pending command responses, keyed by request ID.
    pending: PendingMap,
    next_id: AtomicU64,
    reader_handle: tokio::task::JoinHandle<()>,
    writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    pub async fn connect(ws_url: &str) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| Error::Driver(format!("Failed to connect to CDP endpoint {}: {}", ws_url, e)))?;

        let (mut ws_sink, mut ws_read) = ws_stream.split();
        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = pending.clone();

        // Writer task: owns the sink, forwards messages from channel
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        // Reader task: dispatches command responses; events are not consumed
        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        let Ok(val) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                            let mut pending = pending_clone.lock().await;
                            if let Some(tx) = pending.remove(&id) {
                                let _ = tx.send(val);
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            // Fail whatever is still waiting.
            pending_clone.lock().await.clear();
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            reader_handle,
            writer_handle,
        })
    }

    /// Send a CDP command and wait for its `result`.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        self.send_command_with_timeout(method, params, COMMAND_TIMEOUT).await
    }

    pub async fn send_command_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.ws_tx.send(msg.to_string()).await {
            self.pending.lock().await.remove(&id);
            return Err(Error::Driver(format!("Failed to send CDP command: {}", e)));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error") {
                    Err(Error::Driver(format!("CDP error in {}: {}", method, error)))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(Error::Driver("CDP connection closed".to_string())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Driver(format!(
                    "CDP command '{}' timed out after {}s",
                    method,
                    timeout.as_secs()
                )))
            }
        }
    }

    pub async fn enable_domain(&self, domain: &str) -> Result<()> {
        self.send_command(&format!("{}.enable", domain), json!({})).await?;
        Ok(())
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        let result = self.send_command("Page.navigate", json!({ "url": url })).await?;
        if let Some(error_text) = result.get("errorText").and_then(|v| v.as_str()) {
            return Err(Error::Driver(format!("Navigation to {} failed: {}", url, error_text)));
        }
        Ok(())
    }

    /// Evaluate an expression, awaiting promises, and return its JSON value.
    /// Script exceptions become `Error::Driver`.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .send_command_with_timeout(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
                EVALUATE_TIMEOUT,
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            let description = details
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(|v| v.as_str())
                .or_else(|| details.get("text").and_then(|v| v.as_str()))
                .unwrap_or("unknown exception");
            return Err(Error::Driver(format!("Script error: {}", description)));
        }

        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    pub async fn dispatch_mouse_event(
        &self,
        event_type: &str,
        x: f64,
        y: f64,
        button: &str,
        click_count: i32,
    ) -> Result<()> {
        self.send_command(
            "Input.dispatchMouseEvent",
            json!({
                "type": event_type,
                "x": x,
                "y": y,
                "button": button,
                "clickCount": click_count,
            }),
        )
        .await?;
        Ok(())
    }

    /// Insert text at the focused element (bypasses key events).
    pub async fn insert_text(&self, text: &str) -> Result<()> {
        self.send_command("Input.insertText", json!({ "text": text })).await?;
        Ok(())
    }

    pub async fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        self.send_command(
            "Network.setUserAgentOverride",
            json!({ "userAgent": user_agent }),
        )
        .await?;
        Ok(())
    }

    /// Capture a PNG of the given page-coordinate rectangle, base64-encoded.
    pub async fn capture_clip(&self, x: f64, y: f64, width: f64, height: f64) -> Result<String> {
        let result = self
            .send_command(
                "Page.captureScreenshot",
                json!({
                    "format": "png",
                    "captureBeyondViewport": true,
                    "clip": {
                        "x": x,
                        "y": y,
                        "width": width,
                        "height": height,
                        "scale": 1,
                    },
                }),
            )
            .await?;
        result
            .get("data")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Driver("No screenshot data returned".to_string()))
    }

    /// Create a new page target (tab) with the given URL.
    pub async fn create_target(&self, url: &str) -> Result<String> {
        let result = self
            .send_command("Target.createTarget", json!({ "url": url }))
            .await?;
        result
            .get("targetId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Driver("No targetId returned from createTarget".to_string()))
    }

    pub async fn close_target(&self, target_id: &str) -> Result<()> {
        self.send_command("Target.closeTarget", json!({ "targetId": target_id }))
            .await?;
        Ok(())
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}
