//! Streamable HTTP transport with SSE framing.
//!
//! Each outbound message is an HTTP POST. The server answers with either a
//! plain JSON body or a `text/event-stream` body carrying one or more
//! `data:` events. Either way the payloads are funneled into the same
//! inbound channel the stdio transport uses, so the session above never
//! sees the difference.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::errors::McpError;
use super::transport::Transport;

const CHANNEL_CAPACITY: usize = 64;

// ─── SSE Framing ─────────────────────────────────────────────────────────────

/// Incremental SSE event splitter.
///
/// Network chunks do not respect event boundaries: one chunk may carry half
/// an event or three of them. Bytes accumulate here until a blank line
/// terminates an event, at which point the event's data payload is emitted.
#[derive(Debug, Default)]
pub struct SseFrameBuffer {
    buffer: String,
    /// Last char seen was `\r`; a following `\n` is the same terminator.
    pending_cr: bool,
}

impl SseFrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of text; returns the data payloads of every event
    /// completed by this chunk, in order.
    ///
    /// The SSE grammar allows LF, CRLF, or lone CR line terminators, and a
    /// CRLF may itself be split across chunks. Everything is normalized to
    /// LF on the way into the buffer.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        for ch in chunk.chars() {
            match ch {
                '\r' => {
                    self.buffer.push('\n');
                    self.pending_cr = true;
                }
                '\n' if self.pending_cr => {
                    self.pending_cr = false;
                }
                other => {
                    self.pending_cr = false;
                    self.buffer.push(other);
                }
            }
        }
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let event: String = self.buffer[..pos].to_string();
            self.buffer.drain(..pos + 2);
            if let Some(data) = parse_event_data(&event) {
                payloads.push(data);
            }
        }
        payloads
    }
}

/// Incremental UTF-8 decoder for network chunks.
///
/// Chunk boundaries do not respect character boundaries: a multibyte
/// sequence may arrive half in one chunk, half in the next. Incomplete
/// trailing bytes are held back until the rest arrives instead of being
/// mangled into replacement characters.
#[derive(Debug, Default)]
struct Utf8StreamDecoder {
    tail: Vec<u8>,
}

impl Utf8StreamDecoder {
    /// Feed raw bytes; returns the decoded text completed by this chunk.
    fn push(&mut self, bytes: &[u8]) -> String {
        self.tail.extend_from_slice(bytes);
        match std::str::from_utf8(&self.tail) {
            Ok(text) => {
                let text = text.to_string();
                self.tail.clear();
                text
            }
            Err(e) if e.error_len().is_none() => {
                // Valid prefix with an incomplete sequence at the end; keep
                // the partial bytes for the next chunk.
                let valid = e.valid_up_to();
                let text = String::from_utf8_lossy(&self.tail[..valid]).into_owned();
                self.tail.drain(..valid);
                text
            }
            Err(_) => {
                // Genuinely invalid bytes; substitute and move on.
                let text = String::from_utf8_lossy(&self.tail).into_owned();
                self.tail.clear();
                text
            }
        }
    }
}

/// Extract the joined `data:` payload of one SSE event.
///
/// Returns `None` for events with no data lines (comments, bare `event:`
/// lines) and for the `[DONE]` sentinel some servers emit at end of stream.
fn parse_event_data(event: &str) -> Option<String> {
    let mut data_lines: Vec<&str> = Vec::new();
    for line in event.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if data_lines.is_empty() {
        return None;
    }
    let data = data_lines.join("\n");
    if data == "[DONE]" {
        None
    } else {
        Some(data)
    }
}

// ─── Streamable HTTP Transport ───────────────────────────────────────────────

/// Transport over HTTP POST with SSE-framed responses.
pub struct StreamableHttpTransport {
    server_name: String,
    url: String,
    http: reqwest::Client,
    headers: HashMap<String, String>,
    /// Session id assigned by the server on the first response, echoed back
    /// on every later request.
    session_id: Arc<StdMutex<Option<String>>>,
    inbound_tx: Option<mpsc::Sender<serde_json::Value>>,
    inbound_rx: Option<mpsc::Receiver<serde_json::Value>>,
}

impl StreamableHttpTransport {
    /// Set up the HTTP client for an endpoint. Reachability is not probed
    /// here; an unreachable endpoint surfaces as a `ConnectionError` on the
    /// first send, which for a fresh session is the handshake.
    pub fn connect(
        server_name: &str,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| McpError::ConnectionError {
                server: server_name.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        Ok(Self {
            server_name: server_name.to_string(),
            url: url.to_string(),
            http,
            headers: headers.clone(),
            session_id: Arc::new(StdMutex::new(None)),
            inbound_tx: Some(inbound_tx),
            inbound_rx: Some(inbound_rx),
        })
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn send(&self, message: serde_json::Value) -> Result<(), McpError> {
        let tx = self
            .inbound_tx
            .as_ref()
            .ok_or_else(|| McpError::SessionClosed {
                server: self.server_name.clone(),
            })?
            .clone();

        let mut request = self
            .http
            .post(&self.url)
            .header("Accept", "application/json, text/event-stream")
            .json(&message);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Ok(guard) = self.session_id.lock() {
            if let Some(sid) = guard.as_ref() {
                request = request.header("Mcp-Session-Id", sid.as_str());
            }
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                McpError::ConnectionError {
                    server: self.server_name.clone(),
                    reason: e.to_string(),
                }
            } else {
                McpError::TransportError {
                    server: self.server_name.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("server returned HTTP {status}"),
            });
        }

        if let Some(sid) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(mut guard) = self.session_id.lock() {
                *guard = Some(sid.to_string());
            }
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        // Consume the body off to the side so a slow stream never holds up
        // the next send.
        let name = self.server_name.clone();
        tokio::spawn(async move {
            if content_type.starts_with("text/event-stream") {
                let mut decoder = Utf8StreamDecoder::default();
                let mut frames = SseFrameBuffer::new();
                let mut stream = response.bytes_stream();
                while let Some(chunk) = stream.next().await {
                    let bytes = match chunk {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            tracing::warn!(server = %name, error = %e, "SSE stream failed");
                            return;
                        }
                    };
                    let text = decoder.push(&bytes);
                    for payload in frames.push(&text) {
                        match serde_json::from_str::<serde_json::Value>(&payload) {
                            Ok(value) => {
                                if tx.send(value).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                tracing::debug!(
                                    server = %name,
                                    error = %e,
                                    "skipping non-JSON SSE payload"
                                );
                            }
                        }
                    }
                }
            } else if content_type.starts_with("application/json") {
                match response.json::<serde_json::Value>().await {
                    Ok(value) => {
                        let _ = tx.send(value).await;
                    }
                    Err(e) => {
                        tracing::warn!(server = %name, error = %e, "failed to read JSON body");
                    }
                }
            }
            // Anything else (typically a 202 with an empty body acknowledging
            // a notification) carries no payload to forward.
        });

        Ok(())
    }

    fn take_inbound(&mut self) -> Option<mpsc::Receiver<serde_json::Value>> {
        self.inbound_rx.take()
    }

    async fn close(&mut self) {
        // Dropping our sender half closes the inbound channel once any
        // in-flight body tasks finish; they bail on the first failed send.
        self.inbound_tx.take();
        self.inbound_rx.take();
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
