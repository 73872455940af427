//! Server registry: named sessions and the aggregated tool catalog.
//!
//! Tool names are qualified as `server.tool` so the catalog handed to a
//! model is collision-free across servers: server names are unique within
//! a registry, so two servers exposing the same tool name yield two
//! distinct catalog entries. Dispatch reverses the same qualification, so
//! a call always lands on the server that advertised the tool.
//!
//! Each server's tool list is cached at connect time. `invalidate` marks a
//! single server stale; the next catalog aggregation re-fetches only the
//! stale entries.

use std::collections::HashMap;

use super::errors::McpError;
use super::session::Session;
use super::transport::{connect_spec, Transport};
use super::types::{ServerSpec, ToolDefinition};

/// A tool entry in the aggregated catalog, under its qualified name.
#[derive(Debug, Clone)]
pub struct QualifiedTool {
    /// `server.tool`, unique across the registry.
    pub qualified_name: String,
    /// Name of the server that advertised the tool.
    pub server: String,
    pub tool: ToolDefinition,
}

impl QualifiedTool {
    /// OpenAI-style function schema for this tool, under its qualified
    /// name, as sent to a model.
    pub fn to_function_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.qualified_name,
                "description": self.tool.description,
                "parameters": self.tool.input_schema,
            },
        })
    }
}

struct ServerEntry {
    session: Session,
    tools: Vec<ToolDefinition>,
    stale: bool,
}

/// Named sessions plus the tool catalog aggregated across them.
#[derive(Default)]
pub struct ServerRegistry {
    entries: HashMap<String, ServerEntry>,
    /// Names in connect order; teardown walks this in reverse.
    connection_order: Vec<String>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a server per its spec and register it under its name.
    pub async fn connect(&mut self, spec: &ServerSpec) -> Result<(), McpError> {
        self.check_name(&spec.name)?;
        let transport = connect_spec(spec).await?;
        self.connect_with_transport(&spec.name, transport).await
    }

    /// Register a server over an already-built transport. This is the seam
    /// the spec-based `connect` goes through, and what tests script.
    pub async fn connect_with_transport(
        &mut self,
        name: &str,
        transport: Box<dyn Transport>,
    ) -> Result<(), McpError> {
        self.check_name(name)?;
        let session = Session::connect(name, transport).await?;
        let tools = match session.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                session.close().await;
                return Err(e);
            }
        };
        tracing::info!(server = %name, tool_count = tools.len(), "registered server");
        self.entries.insert(
            name.to_string(),
            ServerEntry {
                session,
                tools,
                stale: false,
            },
        );
        self.connection_order.push(name.to_string());
        Ok(())
    }

    /// Connect several servers concurrently. Failures do not abort the
    /// rest; each is reported alongside the name that failed.
    pub async fn connect_all(&mut self, specs: Vec<ServerSpec>) -> Vec<(String, McpError)> {
        let mut failures = Vec::new();
        let mut handles = Vec::new();

        for spec in specs {
            if let Err(e) = self.check_name(&spec.name) {
                failures.push((spec.name.clone(), e));
                continue;
            }
            if handles.iter().any(|(n, _)| n == &spec.name) {
                failures.push((
                    spec.name.clone(),
                    McpError::DuplicateServer {
                        name: spec.name.clone(),
                    },
                ));
                continue;
            }
            let name = spec.name.clone();
            handles.push((
                name,
                tokio::spawn(async move {
                    let transport = connect_spec(&spec).await?;
                    let session = Session::connect(&spec.name, transport).await?;
                    let tools = match session.list_tools().await {
                        Ok(tools) => tools,
                        Err(e) => {
                            session.close().await;
                            return Err(e);
                        }
                    };
                    Ok::<_, McpError>((session, tools))
                }),
            ));
        }

        for (name, handle) in handles {
            match handle.await {
                Ok(Ok((session, tools))) => {
                    tracing::info!(server = %name, tool_count = tools.len(), "registered server");
                    self.entries.insert(
                        name.clone(),
                        ServerEntry {
                            session,
                            tools,
                            stale: false,
                        },
                    );
                    self.connection_order.push(name);
                }
                Ok(Err(e)) => {
                    tracing::warn!(server = %name, error = %e, "server failed to connect");
                    failures.push((name, e));
                }
                Err(e) => {
                    failures.push((
                        name.clone(),
                        McpError::ConnectionError {
                            server: name,
                            reason: format!("connection task panicked: {e}"),
                        },
                    ));
                }
            }
        }
        failures
    }

    fn check_name(&self, name: &str) -> Result<(), McpError> {
        if name.is_empty() {
            return Err(McpError::InvalidServerName {
                name: name.to_string(),
                reason: "name is empty".to_string(),
            });
        }
        // '.' separates server from tool in qualified names.
        if name.contains('.') {
            return Err(McpError::InvalidServerName {
                name: name.to_string(),
                reason: "name may not contain '.'".to_string(),
            });
        }
        if self.entries.contains_key(name) {
            return Err(McpError::DuplicateServer {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// The session registered under `name`.
    pub fn session(&self, name: &str) -> Result<&Session, McpError> {
        self.entries
            .get(name)
            .map(|e| &e.session)
            .ok_or_else(|| McpError::UnknownServer {
                name: name.to_string(),
            })
    }

    /// Registered server names in connection order.
    pub fn server_names(&self) -> Vec<&str> {
        self.connection_order.iter().map(|s| s.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Mark one server's cached tool list stale. The next aggregation
    /// re-fetches it; other servers' caches are untouched.
    pub fn invalidate(&mut self, name: &str) -> Result<(), McpError> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| McpError::UnknownServer {
                name: name.to_string(),
            })?;
        entry.stale = true;
        tracing::debug!(server = %name, "tool cache invalidated");
        Ok(())
    }

    /// The aggregated tool catalog, sorted by qualified name.
    ///
    /// Stale entries are re-fetched first. A failed re-fetch keeps the
    /// previous snapshot and stays stale, so the next aggregation retries.
    pub async fn aggregate_tools(&mut self) -> Vec<QualifiedTool> {
        for (name, entry) in self.entries.iter_mut() {
            if !entry.stale {
                continue;
            }
            match entry.session.list_tools().await {
                Ok(tools) => {
                    tracing::debug!(server = %name, tool_count = tools.len(), "tool cache refreshed");
                    entry.tools = tools;
                    entry.stale = false;
                }
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "tool cache refresh failed");
                }
            }
        }

        let mut catalog: Vec<QualifiedTool> = self
            .entries
            .iter()
            .flat_map(|(server, entry)| {
                entry.tools.iter().map(move |tool| QualifiedTool {
                    qualified_name: format!("{server}.{}", tool.name),
                    server: server.clone(),
                    tool: tool.clone(),
                })
            })
            .collect();
        catalog.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));
        catalog
    }

    /// Resolve a qualified tool name to the owning session and the
    /// server-local tool name. `None` when no such server is registered.
    ///
    /// The session borrows from the registry; the local name borrows from
    /// `qualified_name`, so the two lifetimes stay independent.
    pub fn resolve<'r, 'n>(
        &'r self,
        qualified_name: &'n str,
    ) -> Option<(&'r Session, &'n str)> {
        let (server, local) = qualified_name.split_once('.')?;
        let entry = self.entries.get(server)?;
        Some((&entry.session, local))
    }

    /// Look up one catalog entry by qualified name, from the cached
    /// snapshots.
    pub fn find_tool(&self, qualified_name: &str) -> Option<QualifiedTool> {
        let (server, local) = qualified_name.split_once('.')?;
        let entry = self.entries.get(server)?;
        entry
            .tools
            .iter()
            .find(|t| t.name == local)
            .map(|tool| QualifiedTool {
                qualified_name: qualified_name.to_string(),
                server: server.to_string(),
                tool: tool.clone(),
            })
    }

    /// Disconnect one server and drop its catalog entries.
    pub async fn disconnect(&mut self, name: &str) -> Result<(), McpError> {
        let entry = self
            .entries
            .remove(name)
            .ok_or_else(|| McpError::UnknownServer {
                name: name.to_string(),
            })?;
        self.connection_order.retain(|n| n != name);
        entry.session.close().await;
        tracing::info!(server = %name, "server disconnected");
        Ok(())
    }

    /// Disconnect every server in reverse connection order. Always runs to
    /// completion; individual close failures are logged, not propagated.
    pub async fn disconnect_all(&mut self) {
        while let Some(name) = self.connection_order.pop() {
            if let Some(entry) = self.entries.remove(&name) {
                entry.session.close().await;
                tracing::debug!(server = %name, "server disconnected");
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
