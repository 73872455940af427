//! Routes model tool calls to the owning server session.
//!
//! Dispatch never panics the turn: every way a call can go wrong comes
//! back as a [`DispatchOutcome`] the model can read and react to.

use crate::mcp_client::registry::{QualifiedTool, ServerRegistry};
use crate::mcp_client::types::ToolOutcome;

use super::types::DispatchOutcome;
use crate::inference::ToolCallRequest;

/// Policy predicate deciding whether a tool is visible to an agent.
/// Evaluated per tool per turn against the current catalog.
pub type ToolFilter = Box<dyn Fn(&str, &QualifiedTool) -> bool + Send + Sync>;

/// Resolves qualified tool names and executes calls against the registry.
pub struct ToolRouter {
    agent_name: String,
    tool_filter: Option<ToolFilter>,
}

impl ToolRouter {
    pub fn new(agent_name: &str) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            tool_filter: None,
        }
    }

    /// Restrict which catalog tools this agent sees and may call.
    pub fn with_tool_filter(
        mut self,
        filter: impl Fn(&str, &QualifiedTool) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.tool_filter = Some(Box::new(filter));
        self
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    fn is_visible(&self, tool: &QualifiedTool) -> bool {
        match &self.tool_filter {
            Some(filter) => filter(&self.agent_name, tool),
            None => true,
        }
    }

    /// The subset of the catalog this agent is allowed to use.
    pub fn visible_tools(&self, catalog: &[QualifiedTool]) -> Vec<QualifiedTool> {
        catalog
            .iter()
            .filter(|t| self.is_visible(t))
            .cloned()
            .collect()
    }

    /// Execute one tool call by qualified name.
    pub async fn dispatch(
        &self,
        registry: &ServerRegistry,
        qualified_name: &str,
        arguments: serde_json::Value,
    ) -> DispatchOutcome {
        let (session, local_name) = match registry.resolve(qualified_name) {
            Some(resolved) => resolved,
            None => {
                tracing::warn!(tool = %qualified_name, "dispatch to unknown tool");
                return DispatchOutcome::DispatchError(format!(
                    "unknown tool '{qualified_name}'"
                ));
            }
        };

        // The filter binds dispatch, not just visibility: a model may still
        // name a tool it was never shown.
        if let Some(tool) = registry.find_tool(qualified_name) {
            if !self.is_visible(&tool) {
                tracing::warn!(
                    agent = %self.agent_name,
                    tool = %qualified_name,
                    "dispatch to filtered-out tool"
                );
                return DispatchOutcome::DispatchError(format!(
                    "tool '{qualified_name}' is not available"
                ));
            }
        }

        tracing::debug!(tool = %qualified_name, server = %session.name(), "dispatching tool call");
        match session.call_tool(local_name, arguments).await {
            Ok(ToolOutcome::Content(content)) => DispatchOutcome::Ok(content),
            Ok(ToolOutcome::ToolError(message)) => DispatchOutcome::ToolError(message),
            Err(e) => {
                tracing::warn!(tool = %qualified_name, error = %e, "tool dispatch failed");
                DispatchOutcome::DispatchError(e.to_string())
            }
        }
    }

    /// Execute a batch of calls in order. Sequential on purpose: the model
    /// expects results in the order it issued the calls.
    pub async fn dispatch_all(
        &self,
        registry: &ServerRegistry,
        calls: Vec<ToolCallRequest>,
    ) -> Vec<(ToolCallRequest, DispatchOutcome)> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let outcome = self
                .dispatch(registry, &call.name, call.arguments.clone())
                .await;
            results.push((call, outcome));
        }
        results
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::testing::{init_response, result_response, scripted, tool_def};

    /// Server whose every tool call answers with `"<tag>:<value arg>"`.
    fn tagged_server(
        tag: &'static str,
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
                    let value = msg["params"]["arguments"]["value"].as_str().unwrap_or("");
                    vec![result_response(
                        id,
                        serde_json::json!({
                            "content": [{"type": "text", "text": format!("{tag}:{value}")}],
                            "isError": false,
                        }),
                    )]
                }
                _ => vec![],
            }
        }
    }

    async fn two_server_registry() -> ServerRegistry {
        let mut registry = ServerRegistry::new();
        registry
            .connect_with_transport("alpha", scripted(tagged_server("alpha", vec![tool_def("x", "")])))
            .await
            .unwrap();
        registry
            .connect_with_transport("beta", scripted(tagged_server("beta", vec![tool_def("x", "")])))
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_dispatch_routes_to_the_owning_server() {
        let registry = two_server_registry().await;
        let router = ToolRouter::new("tester");

        let outcome = router
            .dispatch(&registry, "alpha.x", serde_json::json!({"value": "one"}))
            .await;
        assert_eq!(outcome, DispatchOutcome::Ok("alpha:one".into()));

        let outcome = router
            .dispatch(&registry, "beta.x", serde_json::json!({"value": "two"}))
            .await;
        assert_eq!(outcome, DispatchOutcome::Ok("beta:two".into()));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool_is_dispatch_error() {
        let registry = two_server_registry().await;
        let router = ToolRouter::new("tester");

        let outcome = router
            .dispatch(&registry, "ghost.x", serde_json::json!({}))
            .await;
        match outcome {
            DispatchOutcome::DispatchError(message) => {
                assert!(message.contains("ghost.x"));
            }
            other => panic!("expected DispatchError, got {other:?}"),
        }

        // An unqualified name can never resolve either.
        let outcome = router.dispatch(&registry, "x", serde_json::json!({})).await;
        assert!(matches!(outcome, DispatchOutcome::DispatchError(_)));
    }

    #[tokio::test]
    async fn test_tool_error_flows_through_as_data() {
        let mut registry = ServerRegistry::new();
        registry
            .connect_with_transport(
                "calc",
                scripted(|msg| {
                    let id = match msg.get("id").and_then(|v| v.as_u64()) {
                        Some(id) => id,
                        None => return vec![],
                    };
                    match msg["method"].as_str() {
                        Some("initialize") => vec![init_response(id, true, false, false)],
                        Some("tools/list") => vec![result_response(
                            id,
                            serde_json::json!({"tools": [tool_def("div", "")]}),
                        )],
                        Some("tools/call") => vec![result_response(
                            id,
                            serde_json::json!({
                                "content": [{"type": "text", "text": "division by zero"}],
                                "isError": true,
                            }),
                        )],
                        _ => vec![],
                    }
                }),
            )
            .await
            .unwrap();

        let router = ToolRouter::new("tester");
        let outcome = router
            .dispatch(&registry, "calc.div", serde_json::json!({"a": 1, "b": 0}))
            .await;
        assert_eq!(
            outcome,
            DispatchOutcome::ToolError("division by zero".into())
        );
    }

    #[tokio::test]
    async fn test_filter_hides_tools_and_blocks_dispatch() {
        let mut registry = two_server_registry().await;
        let router = ToolRouter::new("restricted")
            .with_tool_filter(|_agent, tool| tool.server != "beta");

        let catalog = registry.aggregate_tools().await;
        let visible = router.visible_tools(&catalog);
        let names: Vec<&str> = visible.iter().map(|t| t.qualified_name.as_str()).collect();
        assert_eq!(names, vec!["alpha.x"]);

        // Calling the hidden tool anyway is refused before reaching the
        // server.
        let outcome = router
            .dispatch(&registry, "beta.x", serde_json::json!({"value": "v"}))
            .await;
        assert!(matches!(outcome, DispatchOutcome::DispatchError(_)));
    }

    #[tokio::test]
    async fn test_filter_sees_agent_name() {
        let registry = two_server_registry().await;
        let router =
            ToolRouter::new("alpha-only").with_tool_filter(|agent, tool| {
                agent == "alpha-only" && tool.server == "alpha"
            });

        let outcome = router
            .dispatch(&registry, "alpha.x", serde_json::json!({"value": "ok"}))
            .await;
        assert_eq!(outcome, DispatchOutcome::Ok("alpha:ok".into()));
    }

    #[tokio::test]
    async fn test_dispatch_all_preserves_call_order() {
        let registry = two_server_registry().await;
        let router = ToolRouter::new("tester");

        let calls = vec![
            ToolCallRequest {
                id: "c1".into(),
                name: "beta.x".into(),
                arguments: serde_json::json!({"value": "first"}),
            },
            ToolCallRequest {
                id: "c2".into(),
                name: "alpha.x".into(),
                arguments: serde_json::json!({"value": "second"}),
            },
        ];
        let results = router.dispatch_all(&registry, calls).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.id, "c1");
        assert_eq!(results[0].1, DispatchOutcome::Ok("beta:first".into()));
        assert_eq!(results[1].0.id, "c2");
        assert_eq!(results[1].1, DispatchOutcome::Ok("alpha:second".into()));
    }
}
