//! Test support: a scriptable in-memory transport.
//!
//! A responder closure inspects each outbound message and decides which
//! inbound messages to emit, so tests can script handshakes, delayed or
//! reordered responses, and servers that never answer at all.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::errors::McpError;
use super::transport::Transport;

type Responder = Box<dyn FnMut(&serde_json::Value) -> Vec<serde_json::Value> + Send>;
type SentLog = Arc<StdMutex<Vec<serde_json::Value>>>;

pub struct MockTransport {
    responder: StdMutex<Responder>,
    sent: SentLog,
    inbound_tx: Option<mpsc::Sender<serde_json::Value>>,
    inbound_rx: Option<mpsc::Receiver<serde_json::Value>>,
    close_log: Option<(String, Arc<StdMutex<Vec<String>>>)>,
}

impl MockTransport {
    pub fn new(
        responder: impl FnMut(&serde_json::Value) -> Vec<serde_json::Value> + Send + 'static,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        Self {
            responder: StdMutex::new(Box::new(responder)),
            sent: Arc::new(StdMutex::new(Vec::new())),
            inbound_tx: Some(inbound_tx),
            inbound_rx: Some(inbound_rx),
            close_log: None,
        }
    }

    /// Every message sent through this transport, in order.
    pub fn sent_log(&self) -> SentLog {
        Arc::clone(&self.sent)
    }

    /// Record `name` in the shared log when this transport is closed, so
    /// tests can assert teardown order across several transports.
    pub fn with_close_log(mut self, name: &str, log: Arc<StdMutex<Vec<String>>>) -> Self {
        self.close_log = Some((name.to_string(), log));
        self
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, message: serde_json::Value) -> Result<(), McpError> {
        self.sent.lock().unwrap().push(message.clone());
        let replies = (self.responder.lock().unwrap())(&message);
        if let Some(tx) = &self.inbound_tx {
            for reply in replies {
                let _ = tx.send(reply).await;
            }
        }
        Ok(())
    }

    fn take_inbound(&mut self) -> Option<mpsc::Receiver<serde_json::Value>> {
        self.inbound_rx.take()
    }

    async fn close(&mut self) {
        if self.inbound_tx.take().is_some() {
            if let Some((name, log)) = &self.close_log {
                log.lock().unwrap().push(name.clone());
            }
        }
        self.inbound_rx.take();
    }
}

/// Boxed mock transport driven by the given responder.
pub fn scripted(
    responder: impl FnMut(&serde_json::Value) -> Vec<serde_json::Value> + Send + 'static,
) -> Box<dyn Transport> {
    Box::new(MockTransport::new(responder))
}

/// Like [`scripted`], but also hands back the sent-message log.
pub fn scripted_with_log(
    responder: impl FnMut(&serde_json::Value) -> Vec<serde_json::Value> + Send + 'static,
) -> (Box<dyn Transport>, SentLog) {
    let transport = MockTransport::new(responder);
    let log = transport.sent_log();
    (Box::new(transport), log)
}

/// Successful `initialize` response advertising the given capabilities.
pub fn init_response(id: u64, tools: bool, prompts: bool, resources: bool) -> serde_json::Value {
    let mut caps = serde_json::Map::new();
    if tools {
        caps.insert("tools".into(), serde_json::json!({}));
    }
    if prompts {
        caps.insert("prompts".into(), serde_json::json!({}));
    }
    if resources {
        caps.insert("resources".into(), serde_json::json!({}));
    }
    result_response(
        id,
        serde_json::json!({
            "protocolVersion": "2025-03-26",
            "capabilities": caps,
            "serverInfo": {"name": "mock", "version": "0.0.0"},
        }),
    )
}

/// Successful JSON-RPC response wrapping the given result.
pub fn result_response(id: u64, result: serde_json::Value) -> serde_json::Value {
    serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result})
}

/// JSON-RPC error response.
pub fn error_response(id: u64, code: i32, message: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": null,
        "error": {"code": code, "message": message},
    })
}

/// Tool definition shaped like a `tools/list` entry.
pub fn tool_def(name: &str, description: &str) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "description": description,
        "inputSchema": {"type": "object", "properties": {}},
    })
}

/// Responder for a server exposing the given tools, where every tool call
/// echoes back the text of its `value` argument.
pub fn echo_server(
    tools: Vec<serde_json::Value>,
) -> impl FnMut(&serde_json::Value) -> Vec<serde_json::Value> + Send + 'static {
    move |msg: &serde_json::Value| {
        let id = match msg.get("id").and_then(|v| v.as_u64()) {
            Some(id) => id,
            None => return vec![],
        };
        match msg["method"].as_str() {
            Some("initialize") => vec![init_response(id, true, false, false)],
            Some("tools/list") => {
                vec![result_response(id, serde_json::json!({"tools": tools.clone()}))]
            }
            Some("tools/call") => {
                let value = msg["params"]["arguments"]["value"]
                    .as_str()
                    .unwrap_or("")
                    .to_string();
                vec![result_response(
                    id,
                    serde_json::json!({
                        "content": [{"type": "text", "text": value}],
                        "isError": false,
                    }),
                )]
            }
            _ => vec![],
        }
    }
}

/// Install a log subscriber for the test process, once. Honors `RUST_LOG`.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Pull the `(name, arguments)` of the first `tools/call` request in a log.
pub fn tool_call_request_args(
    log: &[serde_json::Value],
) -> Option<(String, serde_json::Value)> {
    log.iter().find(|m| m["method"] == "tools/call").map(|m| {
        (
            m["params"]["name"].as_str().unwrap_or("").to_string(),
            m["params"]["arguments"].clone(),
        )
    })
}
