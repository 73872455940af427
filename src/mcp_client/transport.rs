//! Transport layer: message-passing channels to tool servers.
//!
//! A transport moves opaque JSON messages in both directions and knows
//! nothing about request/response pairing. Correlation lives one layer up,
//! in the session, so every transport behind the [`Transport`] trait gets
//! out-of-order response handling for free.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use super::errors::McpError;
use super::sse::StreamableHttpTransport;
use super::types::{ServerSpec, TransportSpec};

/// How long to wait for a child process to exit after stdin closes
/// before killing it.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Buffer sizes for the in-process message channels.
const CHANNEL_CAPACITY: usize = 64;

// ─── Transport Trait ─────────────────────────────────────────────────────────

/// A bidirectional, message-oriented channel to one tool server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one JSON message to the server.
    async fn send(&self, message: serde_json::Value) -> Result<(), McpError>;

    /// Take the inbound message stream. Yields `Some` exactly once; the
    /// session claims it at connect time and owns it from then on.
    fn take_inbound(&mut self) -> Option<mpsc::Receiver<serde_json::Value>>;

    /// Release the underlying resources. Idempotent; never blocks
    /// indefinitely.
    async fn close(&mut self);
}

/// Build the transport a server spec calls for.
pub async fn connect_spec(spec: &ServerSpec) -> Result<Box<dyn Transport>, McpError> {
    match &spec.transport {
        TransportSpec::Stdio { command, args, env } => {
            let transport = StdioTransport::spawn(&spec.name, command, args, env)?;
            Ok(Box::new(transport))
        }
        TransportSpec::StreamableHttp { url, headers } => {
            let transport = StreamableHttpTransport::connect(&spec.name, url, headers)?;
            Ok(Box::new(transport))
        }
    }
}

// ─── Stdio Transport ─────────────────────────────────────────────────────────

/// Transport over a child process's stdin/stdout, one JSON message per line.
///
/// A writer task owns stdin and a reader task owns stdout, so sends never
/// wait on reads. stderr is drained to the log; servers routinely write
/// startup noise there and a full pipe would wedge the child.
pub struct StdioTransport {
    server_name: String,
    outbound_tx: Option<mpsc::Sender<String>>,
    inbound_rx: Option<mpsc::Receiver<serde_json::Value>>,
    child: Option<Child>,
}

impl StdioTransport {
    /// Spawn the server process and wire up its stdio pipes.
    pub fn spawn(
        server_name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::ConnectionError {
                server: server_name.to_string(),
                reason: format!("failed to spawn '{command}': {e}"),
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| McpError::ConnectionError {
            server: server_name.to_string(),
            reason: "child stdin not captured".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| McpError::ConnectionError {
            server: server_name.to_string(),
            reason: "child stdout not captured".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| McpError::ConnectionError {
            server: server_name.to_string(),
            reason: "child stderr not captured".to_string(),
        })?;

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<serde_json::Value>(CHANNEL_CAPACITY);

        // Writer task: owns stdin until the outbound channel closes, then
        // drops it so the child sees EOF.
        let name = server_name.to_string();
        tokio::spawn(async move {
            while let Some(line) = outbound_rx.recv().await {
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    tracing::warn!(server = %name, error = %e, "stdin write failed");
                    break;
                }
                if let Err(e) = stdin.write_all(b"\n").await {
                    tracing::warn!(server = %name, error = %e, "stdin write failed");
                    break;
                }
                if let Err(e) = stdin.flush().await {
                    tracing::warn!(server = %name, error = %e, "stdin flush failed");
                    break;
                }
            }
        });

        // Reader task: one JSON message per line. Non-JSON lines are logged
        // and skipped; exiting drops inbound_tx, which the session observes
        // as end-of-stream.
        let name = server_name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<serde_json::Value>(line) {
                            Ok(message) => {
                                if inbound_tx.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::debug!(
                                    server = %name,
                                    error = %e,
                                    "skipping non-JSON stdout line"
                                );
                            }
                        }
                    }
                    Ok(None) => {
                        tracing::debug!(server = %name, "stdout closed");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(server = %name, error = %e, "stdout read failed");
                        break;
                    }
                }
            }
        });

        // Drain stderr so the child never blocks on a full pipe.
        let name = server_name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(server = %name, "stderr: {line}");
            }
        });

        tracing::info!(server = %server_name, command = %command, "spawned stdio server");

        Ok(Self {
            server_name: server_name.to_string(),
            outbound_tx: Some(outbound_tx),
            inbound_rx: Some(inbound_rx),
            child: Some(child),
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: serde_json::Value) -> Result<(), McpError> {
        let tx = self.outbound_tx.as_ref().ok_or_else(|| McpError::SessionClosed {
            server: self.server_name.clone(),
        })?;
        let line = serde_json::to_string(&message).map_err(|e| McpError::TransportError {
            server: self.server_name.clone(),
            reason: format!("failed to serialize message: {e}"),
        })?;
        tx.send(line).await.map_err(|_| McpError::TransportError {
            server: self.server_name.clone(),
            reason: "writer task terminated".to_string(),
        })
    }

    fn take_inbound(&mut self) -> Option<mpsc::Receiver<serde_json::Value>> {
        self.inbound_rx.take()
    }

    async fn close(&mut self) {
        // Closing the outbound channel ends the writer task, which drops
        // stdin. Well-behaved servers exit on stdin EOF.
        self.outbound_tx.take();

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(server = %self.server_name, %status, "server exited");
                }
                Ok(Err(e)) => {
                    tracing::warn!(server = %self.server_name, error = %e, "wait failed");
                }
                Err(_) => {
                    tracing::warn!(server = %self.server_name, "server did not exit, killing");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(server = %self.server_name, error = %e, "kill failed");
                    }
                }
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
