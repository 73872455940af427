//! The conversation loop: model, tools, repeat.
//!
//! One user turn runs model completions and tool dispatches until the
//! model stops asking for tools or the round budget runs out. Every tool
//! call and its result land in the history, so the model always sees the
//! full round-trip record on the next completion.

use crate::inference::{ModelClient, ModelResponse};
use crate::mcp_client::registry::ServerRegistry;

use super::errors::AgentError;
use super::tool_router::ToolRouter;
use super::types::{Turn, TurnOutcome};

/// Tool round-trips allowed per user turn before the loop gives up.
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;

/// Drives a conversation against one model and a registry of tool servers.
pub struct ConversationLoop {
    model: Box<dyn ModelClient>,
    registry: ServerRegistry,
    router: ToolRouter,
    history: Vec<Turn>,
    max_tool_rounds: usize,
}

impl ConversationLoop {
    pub fn new(model: Box<dyn ModelClient>, registry: ServerRegistry) -> Self {
        Self {
            model,
            registry,
            router: ToolRouter::new("default"),
            history: Vec::new(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_router(mut self, router: ToolRouter) -> Self {
        self.router = router;
        self
    }

    pub fn with_max_tool_rounds(mut self, max_tool_rounds: usize) -> Self {
        self.max_tool_rounds = max_tool_rounds;
        self
    }

    /// Full conversation history, oldest first.
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    /// Mutable registry access, for invalidating tool caches or connecting
    /// servers mid-conversation.
    pub fn registry_mut(&mut self) -> &mut ServerRegistry {
        &mut self.registry
    }

    /// Run one user turn to completion.
    ///
    /// Terminates in one of exactly two ways: the model answers without
    /// requesting tools, or it keeps requesting tools past the round
    /// budget. Tool failures of any kind are fed back as results, never
    /// raised from here.
    pub async fn run_turn(&mut self, user_input: &str) -> Result<TurnOutcome, AgentError> {
        self.history.push(Turn::User {
            content: user_input.to_string(),
        });

        let mut rounds = 0;
        loop {
            // Re-aggregated each round so cache invalidations take effect
            // within a turn, not just between turns.
            let catalog = self.registry.aggregate_tools().await;
            let visible = self.router.visible_tools(&catalog);

            let response = self.model.complete(&self.history, &visible).await?;
            let calls = match response {
                ModelResponse::Answer(text) => {
                    self.history.push(Turn::Assistant {
                        content: text.clone(),
                    });
                    tracing::debug!(rounds, "turn finished with answer");
                    return Ok(TurnOutcome::FinalAnswer(text));
                }
                ModelResponse::ToolCalls(calls) => calls,
            };

            if rounds >= self.max_tool_rounds {
                tracing::warn!(rounds, "tool round budget exhausted");
                return Ok(TurnOutcome::TurnLimitExceeded { rounds });
            }
            rounds += 1;

            for call in &calls {
                self.history.push(Turn::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                });
            }
            for (call, outcome) in self.router.dispatch_all(&self.registry, calls).await {
                let (content, is_error) = outcome.into_result_parts();
                self.history.push(Turn::ToolResult {
                    call_id: call.id,
                    content,
                    is_error,
                });
            }
        }
    }

    /// Disconnect every server. The loop is inert afterwards but keeps its
    /// history readable.
    pub async fn shutdown(&mut self) {
        self.registry.disconnect_all().await;
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    use async_trait::async_trait;

    use super::*;
    use crate::inference::{InferenceError, ToolCallRequest};
    use crate::mcp_client::registry::QualifiedTool;
    use crate::mcp_client::testing::{echo_server, scripted, tool_def};

    /// Model driven by a closure over the visible history and tools.
    struct FnModel<F>(F)
    where
        F: Fn(&[Turn], &[QualifiedTool]) -> Result<ModelResponse, InferenceError> + Send + Sync;

    #[async_trait]
    impl<F> ModelClient for FnModel<F>
    where
        F: Fn(&[Turn], &[QualifiedTool]) -> Result<ModelResponse, InferenceError> + Send + Sync,
    {
        async fn complete(
            &self,
            turns: &[Turn],
            tools: &[QualifiedTool],
        ) -> Result<ModelResponse, InferenceError> {
            (self.0)(turns, tools)
        }
    }

    async fn echo_registry() -> ServerRegistry {
        let mut registry = ServerRegistry::new();
        registry
            .connect_with_transport(
                "util",
                scripted(echo_server(vec![tool_def("echo", "Echo the value back")])),
            )
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_turn_with_tool_round_trip() {
        // The model asks for one echo call, then answers with whatever the
        // tool returned.
        let model = FnModel(|turns: &[Turn], tools: &[QualifiedTool]| {
            assert_eq!(tools.len(), 1);
            assert_eq!(tools[0].qualified_name, "util.echo");
            match turns.last() {
                Some(Turn::ToolResult { content, .. }) => {
                    Ok(ModelResponse::Answer(content.clone()))
                }
                _ => Ok(ModelResponse::ToolCalls(vec![ToolCallRequest {
                    id: "c1".into(),
                    name: "util.echo".into(),
                    arguments: serde_json::json!({"value": "hi"}),
                }])),
            }
        });

        let mut conversation = ConversationLoop::new(Box::new(model), echo_registry().await);
        let outcome = conversation.run_turn("say hi").await.unwrap();
        assert_eq!(outcome, TurnOutcome::FinalAnswer("hi".into()));

        // History holds the complete round trip in order.
        let history = conversation.history();
        assert_eq!(history.len(), 4);
        assert!(matches!(&history[0], Turn::User { content } if content == "say hi"));
        assert!(matches!(&history[1], Turn::ToolCall { name, .. } if name == "util.echo"));
        assert!(
            matches!(&history[2], Turn::ToolResult { content, is_error, .. } if content == "hi" && !is_error)
        );
        assert!(matches!(&history[3], Turn::Assistant { content } if content == "hi"));
        conversation.shutdown().await;
    }

    #[tokio::test]
    async fn test_turn_limit_is_deterministic() {
        // A model that never stops asking for tools.
        let completions = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&completions);
        let model = FnModel(move |_turns: &[Turn], _tools: &[QualifiedTool]| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ModelResponse::ToolCalls(vec![ToolCallRequest {
                id: "again".into(),
                name: "util.echo".into(),
                arguments: serde_json::json!({"value": "loop"}),
            }]))
        });

        let mut conversation = ConversationLoop::new(Box::new(model), echo_registry().await)
            .with_max_tool_rounds(3);
        let outcome = conversation.run_turn("never ends").await.unwrap();
        assert_eq!(outcome, TurnOutcome::TurnLimitExceeded { rounds: 3 });
        // Three rounds ran, and a fourth request tripped the limit.
        assert_eq!(completions.load(Ordering::SeqCst), 4);
        conversation.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_tool_is_reported_back_not_raised() {
        let model = FnModel(|turns: &[Turn], _tools: &[QualifiedTool]| match turns.last() {
            Some(Turn::ToolResult { content, is_error, .. }) => {
                assert!(*is_error);
                Ok(ModelResponse::Answer(format!("saw: {content}")))
            }
            _ => Ok(ModelResponse::ToolCalls(vec![ToolCallRequest {
                id: "c1".into(),
                name: "nowhere.nothing".into(),
                arguments: serde_json::json!({}),
            }])),
        });

        let mut conversation = ConversationLoop::new(Box::new(model), echo_registry().await);
        let outcome = conversation.run_turn("try it").await.unwrap();
        match outcome {
            TurnOutcome::FinalAnswer(text) => {
                assert!(text.contains("unknown tool 'nowhere.nothing'"));
            }
            other => panic!("expected FinalAnswer, got {other:?}"),
        }
        conversation.shutdown().await;
    }

    #[tokio::test]
    async fn test_model_failure_aborts_the_turn() {
        let model = FnModel(|_turns: &[Turn], _tools: &[QualifiedTool]| {
            Err(InferenceError::Api {
                status: 500,
                message: "backend down".into(),
            })
        });

        let mut conversation = ConversationLoop::new(Box::new(model), echo_registry().await);
        let result = conversation.run_turn("hello").await;
        assert!(matches!(result, Err(AgentError::Model { .. })));
        conversation.shutdown().await;
    }

    #[tokio::test]
    async fn test_router_filter_shapes_what_the_model_sees() {
        let seen = Arc::new(StdMutex::new(Vec::<String>::new()));
        let seen_by_model = Arc::clone(&seen);
        let model = FnModel(move |_turns: &[Turn], tools: &[QualifiedTool]| {
            let mut log = seen_by_model.lock().unwrap();
            for tool in tools {
                log.push(tool.qualified_name.clone());
            }
            Ok(ModelResponse::Answer("ok".into()))
        });

        let mut registry = ServerRegistry::new();
        registry
            .connect_with_transport(
                "a",
                scripted(echo_server(vec![tool_def("allowed", "")])),
            )
            .await
            .unwrap();
        registry
            .connect_with_transport(
                "b",
                scripted(echo_server(vec![tool_def("hidden", "")])),
            )
            .await
            .unwrap();

        let router = ToolRouter::new("narrow").with_tool_filter(|_agent, tool| tool.server == "a");
        let mut conversation =
            ConversationLoop::new(Box::new(model), registry).with_router(router);
        conversation.run_turn("what can you do").await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["a.allowed".to_string()]);
        conversation.shutdown().await;
    }

    #[tokio::test]
    async fn test_multiple_user_turns_accumulate_history() {
        let model = FnModel(|turns: &[Turn], _tools: &[QualifiedTool]| {
            let users = turns
                .iter()
                .filter(|t| matches!(t, Turn::User { .. }))
                .count();
            Ok(ModelResponse::Answer(format!("turn {users}")))
        });

        let mut conversation = ConversationLoop::new(Box::new(model), echo_registry().await);
        assert_eq!(
            conversation.run_turn("one").await.unwrap(),
            TurnOutcome::FinalAnswer("turn 1".into())
        );
        assert_eq!(
            conversation.run_turn("two").await.unwrap(),
            TurnOutcome::FinalAnswer("turn 2".into())
        );
        assert_eq!(conversation.history().len(), 4);
        conversation.shutdown().await;
    }
}
