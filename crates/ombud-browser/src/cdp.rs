//! WebSocket client for the Chrome DevTools Protocol.
//!
//! Sends JSON-RPC commands with auto-incrementing ids and correlates the
//! browser's responses back to the waiting caller. Events pushed by the
//! browser are discarded: the portal driver only ever issues commands and
//! reads their results.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::BrowserError;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<CommandOutcome>>>>;

/// Default per-command timeout. Navigation and long in-page fetches are
/// bounded separately by the caller's scope timeouts.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolution of a single CDP command.
#[derive(Debug)]
enum CommandOutcome {
    Result(Value),
    Error { code: i64, message: String },
}

/// Client for one DevTools page target.
///
/// `send_command` takes `&self`, so a single client can serve concurrent
/// callers (the detail-fetch workers all share one session). Each call is
/// an isolated protocol turn; the browser serializes execution.
pub struct CdpClient {
    next_id: AtomicU64,
    pending: PendingMap,
    writer: Mutex<WsSink>,
    reader_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a DevTools page WebSocket endpoint
    /// (`ws://127.0.0.1:<port>/devtools/page/<target>`).
    pub async fn connect(ws_url: &str) -> Result<Self, BrowserError> {
        let (stream, _) = tokio_tungstenite::connect_async(ws_url).await.map_err(|e| {
            BrowserError::ConnectionFailed {
                url: ws_url.to_string(),
                reason: e.to_string(),
            }
        })?;

        let (writer, reader) = stream.split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let reader_handle = tokio::spawn(read_loop(reader, Arc::clone(&pending)));

        tracing::debug!(url = ws_url, "DevTools connection established");

        Ok(Self {
            next_id: AtomicU64::new(1),
            pending,
            writer: Mutex::new(writer),
            reader_handle,
        })
    }

    /// Send a command and wait for its result with the default timeout.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, BrowserError> {
        self.send_command_with_timeout(method, params, COMMAND_TIMEOUT)
            .await
    }

    /// Send a command and wait for its result.
    pub async fn send_command_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, BrowserError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::json!({ "id": id, "method": method, "params": params });
        let text = frame.to_string();

        // Register before sending so a fast response cannot race the insert.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.send(Message::Text(text.into())).await {
                self.pending.lock().await.remove(&id);
                return Err(BrowserError::Protocol {
                    detail: format!("failed to send {method}: {e}"),
                });
            }
        }

        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                return Err(BrowserError::Protocol {
                    detail: "DevTools connection closed while awaiting response".to_string(),
                })
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(BrowserError::Timeout {
                    method: method.to_string(),
                    duration: timeout,
                });
            }
        };

        match outcome {
            CommandOutcome::Result(value) => Ok(value),
            CommandOutcome::Error { code, message } => Err(BrowserError::CdpError { code, message }),
        }
    }

    /// Enable a CDP domain (`Page`, `Runtime`, ...).
    pub async fn enable_domain(&self, domain: &str) -> Result<(), BrowserError> {
        self.send_command(&format!("{domain}.enable"), serde_json::json!({}))
            .await?;
        Ok(())
    }

    /// Tear down the connection; in-flight commands fail.
    pub fn close(&self) {
        self.reader_handle.abort();
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read frames off the socket, resolving pending commands by id.
///
/// Frames carrying a `method` but no `id` are browser-initiated events and
/// are dropped. When the socket closes, every pending command is failed so
/// no caller hangs.
async fn read_loop(mut reader: WsSource, pending: PendingMap) {
    while let Some(frame) = reader.next().await {
        let text = match frame {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "DevTools socket read error");
                break;
            }
        };

        let json: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable DevTools frame");
                continue;
            }
        };

        let Some(id) = json.get("id").and_then(Value::as_u64) else {
            continue; // event frame
        };

        let outcome = match json.get("error") {
            Some(err) => CommandOutcome::Error {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(-1),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown CDP error")
                    .to_string(),
            },
            None => CommandOutcome::Result(json.get("result").cloned().unwrap_or(Value::Null)),
        };

        if let Some(tx) = pending.lock().await.remove(&id) {
            let _ = tx.send(outcome);
        }
    }

    // Fail everything still waiting so callers see a closed connection
    // instead of a timeout.
    let mut pending = pending.lock().await;
    for (_, tx) in pending.drain() {
        let _ = tx.send(CommandOutcome::Error {
            code: -1,
            message: "DevTools connection closed".to_string(),
        });
    }
}
