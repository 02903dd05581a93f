//! Chrome DevTools Protocol client over WebSocket.
//!
//! One client talks to one page target. Commands are matched to responses by id;
//! events are fanned out to subscribers by method name.

use pagescout_core::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;
type ListenerMap = HashMap<String, Vec<mpsc::Sender<Value>>>;
type Listeners = Arc<Mutex<ListenerMap>>;

/// A decoded inbound frame.
#[derive(Debug, PartialEq)]
enum Incoming {
    Response { id: u64, body: Value },
    Event { method: String, params: Value },
    Other,
}

fn classify(text: &str) -> Incoming {
    let Ok(val) = serde_json::from_str::<Value>(text) else {
        return Incoming::Other;
    };
    if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
        return Incoming::Response { id, body: val };
    }
    match val.get("method").and_then(|v| v.as_str()) {
        Some(method) => Incoming::Event {
            method: method.to_string(),
            params: val.get("params").cloned().unwrap_or(Value::Null),
        },
        None => Incoming::Other,
    }
}

/// Register a listener for `method`, dropping those whose receiver is gone.
fn add_listener(listeners: &mut ListenerMap, method: &str) -> mpsc::Receiver<Value> {
    let (tx, rx) = mpsc::channel(64);
    let senders = listeners.entry(method.to_string()).or_default();
    senders.retain(|tx| !tx.is_closed());
    senders.push(tx);
    rx
}

fn dispatch(listeners: &mut ListenerMap, method: &str, params: &Value) {
    if let Some(senders) = listeners.get_mut(method) {
        senders.retain(|tx| !tx.is_closed());
        for tx in senders.iter() {
            let _ = tx.try_send(params.clone());
        }
        if senders.is_empty() {
            listeners.remove(method);
        }
    }
}

/// Split a command response into its `result` or a CDP error.
fn into_result(method: &str, response: Value) -> Result<Value> {
    if let Some(error) = response.get("error") {
        return Err(Error::Cdp(format!("{} failed: {}", method, error)));
    }
    Ok(response.get("result").cloned().unwrap_or(Value::Null))
}

/// Turn `exceptionDetails` of a Runtime call into an error.
pub(crate) fn check_exception(result: &Value) -> Result<()> {
    match result.get("exceptionDetails") {
        Some(details) => {
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(|v| v.as_str())
                .unwrap_or("script threw");
            Err(Error::Browser(format!("script exception: {}", text)))
        }
        None => Ok(()),
    }
}

pub struct CdpClient {
    ws_tx: mpsc::Sender<String>,
    pending: Pending,
    next_id: AtomicU64,
    event_listeners: Listeners,
    command_timeout: Duration,
    reader_handle: tokio::task::JoinHandle<()>,
    writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to the WebSocket debugger URL of a target.
    pub async fn connect(ws_url: &str, command_timeout: Duration) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| Error::Cdp(format!("failed to connect to {}: {}", ws_url, e)))?;

        let (mut ws_sink, mut ws_read) = ws_stream.split();
        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = pending.clone();
        let event_listeners: Listeners = Arc::new(Mutex::new(HashMap::new()));
        let events_clone = event_listeners.clone();

        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match classify(&text) {
                        Incoming::Response { id, body } => {
                            if let Some(tx) = pending_clone.lock().await.remove(&id) {
                                let _ = tx.send(body);
                            }
                        }
                        Incoming::Event { method, params } => {
                            dispatch(&mut *events_clone.lock().await, &method, &params);
                        }
                        Incoming::Other => {}
                    },
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by browser");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            event_listeners,
            command_timeout,
            reader_handle,
            writer_handle,
        })
    }

    /// Send a command and wait for its result.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
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
            return Err(Error::Cdp(format!("failed to send {}: {}", method, e)));
        }

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(response)) => into_result(method, response),
            Ok(Err(_)) => Err(Error::Cdp(format!("connection closed while waiting for {}", method))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Timeout(format!(
                    "CDP command '{}' timed out after {}s",
                    method,
                    self.command_timeout.as_secs()
                )))
            }
        }
    }

    /// Receive the params of every future `method` event.
    pub async fn subscribe_event(&self, method: &str) -> mpsc::Receiver<Value> {
        add_listener(&mut *self.event_listeners.lock().await, method)
    }

    pub async fn enable_domain(&self, domain: &str) -> Result<()> {
        self.send_command(&format!("{}.enable", domain), json!({})).await?;
        Ok(())
    }

    /// Navigate and wait for the load event.
    pub async fn navigate(&self, url: &str) -> Result<()> {
        let mut loaded = self.subscribe_event("Page.loadEventFired").await;
        let result = self.send_command("Page.navigate", json!({ "url": url })).await?;
        if let Some(reason) = result.get("errorText").and_then(|v| v.as_str()) {
            return Err(Error::Browser(format!("navigation to {} failed: {}", url, reason)));
        }
        // Same-document navigations carry no loaderId and fire no load event.
        if result.get("loaderId").is_none() {
            return Ok(());
        }
        match tokio::time::timeout(self.command_timeout, loaded.recv()).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(Error::Cdp("connection closed during navigation".to_string())),
            Err(_) => Err(Error::Timeout(format!("page {} did not finish loading", url))),
        }
    }

    /// Evaluate an expression and return its value (`returnByValue`).
    pub async fn evaluate_js(&self, expression: &str) -> Result<Value> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        check_exception(&result)?;
        Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }

    /// Evaluate an expression and return the remote object, kept alive in `object_group`.
    pub async fn evaluate_handle(&self, expression: &str, object_group: &str) -> Result<Value> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "objectGroup": object_group,
                    "returnByValue": false,
                }),
            )
            .await?;
        check_exception(&result)?;
        Ok(result.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Call `function_declaration` with `this` bound to a remote object.
    ///
    /// Returns the `result` remote object; with `return_by_value` its `value` holds the data.
    pub async fn call_function_on(
        &self,
        object_id: &str,
        function_declaration: &str,
        arguments: Vec<Value>,
        return_by_value: bool,
    ) -> Result<Value> {
        let args: Vec<Value> = arguments.into_iter().map(|v| json!({ "value": v })).collect();
        let result = self
            .send_command(
                "Runtime.callFunctionOn",
                json!({
                    "objectId": object_id,
                    "functionDeclaration": function_declaration,
                    "arguments": args,
                    "returnByValue": return_by_value,
                    "awaitPromise": true,
                }),
            )
            .await?;
        check_exception(&result)?;
        Ok(result.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Own properties of a remote object (used to unpack arrays of nodes).
    pub async fn get_properties(&self, object_id: &str) -> Result<Vec<Value>> {
        let result = self
            .send_command(
                "Runtime.getProperties",
                json!({ "objectId": object_id, "ownProperties": true }),
            )
            .await?;
        Ok(result
            .get("result")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    pub async fn release_object_group(&self, object_group: &str) -> Result<()> {
        self.send_command("Runtime.releaseObjectGroup", json!({ "objectGroup": object_group }))
            .await?;
        Ok(())
    }

    /// Full-page JPEG screenshot, base64 encoded as returned by the browser.
    pub async fn screenshot(&self, quality: u8) -> Result<String> {
        let metrics = self.send_command("Page.getLayoutMetrics", json!({})).await?;
        let size = metrics
            .get("cssContentSize")
            .or_else(|| metrics.get("contentSize"));
        let mut params = json!({
            "format": "jpeg",
            "quality": quality,
            "captureBeyondViewport": true,
        });
        if let Some(size) = size {
            params["clip"] = json!({
                "x": 0,
                "y": 0,
                "width": size.get("width").cloned().unwrap_or(json!(0)),
                "height": size.get("height").cloned().unwrap_or(json!(0)),
                "scale": 1,
            });
        }
        let result = self.send_command("Page.captureScreenshot", params).await?;
        result
            .get("data")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Browser("no screenshot data returned".to_string()))
    }

    pub async fn get_cookies(&self) -> Result<Vec<Value>> {
        let result = self.send_command("Network.getCookies", json!({})).await?;
        Ok(result
            .get("cookies")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    pub async fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        self.send_command("Network.setUserAgentOverride", json!({ "userAgent": user_agent }))
            .await?;
        Ok(())
    }

    /// Register a script that runs before any page script on every new document.
    pub async fn add_script_on_new_document(&self, source: &str) -> Result<()> {
        self.send_command(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({ "source": source }),
        )
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
