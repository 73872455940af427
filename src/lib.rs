//! Multi-server MCP client with a tool-calling conversation loop.
//!
//! Three layers:
//! - [`mcp_client`]: transports (stdio subprocess, streamable HTTP),
//!   per-server sessions with request-id correlation, and a registry that
//!   aggregates every server's tools into one collision-free catalog.
//! - [`inference`]: the [`ModelClient`](inference::ModelClient) trait and
//!   an OpenAI-compatible implementation.
//! - [`agent_core`]: the loop that feeds the catalog to a model, dispatches
//!   the tool calls it asks for, and repeats until it answers.
//!
//! ```no_run
//! use toolbridge::agent_core::ConversationLoop;
//! use toolbridge::inference::OpenAiClient;
//! use toolbridge::mcp_client::{ServerRegistry, ServersConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config: ServersConfig = serde_json::from_str(
//!     r#"{"servers": [{"name": "docs", "transport": "stdio", "command": "uv",
//!         "args": ["run", "mcp_server.py"]}]}"#,
//! )?;
//!
//! let mut registry = ServerRegistry::new();
//! for (name, error) in registry.connect_all(config.servers).await {
//!     tracing::warn!(server = %name, %error, "server unavailable");
//! }
//!
//! let model = OpenAiClient::new("http://localhost:11434", "qwen3:8b")?;
//! let mut conversation = ConversationLoop::new(Box::new(model), registry);
//! let outcome = conversation.run_turn("What servers can you reach?").await?;
//! println!("{outcome:?}");
//! conversation.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod agent_core;
pub mod inference;
pub mod mcp_client;
