// SPDX-License-Identifier: Apache-2.0
//! End-to-end tests wiring together session store, memory stream, tool
//! registry/executor, agent loop, behavior matcher/fallback, and the bridge
//! — the same path a `process(user_input)` call takes in production, with
//! the mock model provider standing in for a vendor.
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;

use orb_behavior::{BehaviorMatcher, FallbackBehavior, Orchestrator};
use orb_bridge::{BrainCerebellumBridge, BrainCommand};
use orb_config::{AgentConfig, ContextBuilderConfig, MemoryRankerConfig, ResetPolicyConfig};
use orb_core::{AgentLoop, ContextBuilder, HookRegistry, QueueMode, SessionStore};
use orb_memory::{Memory, MemoryStream, MemoryType, RankerWeights};
use orb_model::{ModelProvider, MockProvider, ScriptedMockProvider};
use orb_tools::builtin::{MemoryGetTool, MemorySearchTool, MemoryWriteTool};
use orb_tools::{ExecutionContext, ToolCall, ToolExecutor, ToolPolicy, ToolRegistry, ToolStatus};

fn agent_config() -> AgentConfig {
    AgentConfig { max_concurrent_agents: 4, agent_timeout: 30, health_check_interval: 10, max_iterations: 5, max_tool_calls_per_turn: 4, run_timeout_seconds: 10 }
}

fn context_builder(inject_memory: bool) -> Arc<ContextBuilder> {
    Arc::new(ContextBuilder::new(
        ContextBuilderConfig {
            max_history_messages: 40,
            include_tool_results: true,
            max_context_tokens: 8000,
            reserve_tokens: 500,
            inject_bootstrap: false,
            inject_memory,
            bootstrap_files: vec![],
            recent_memory_days: 7,
        },
        MemoryRankerConfig::default(),
    ))
}

async fn session_store() -> (Arc<SessionStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    (Arc::new(SessionStore::new(dir.path()).unwrap()), dir)
}

/// Builds a full `Orchestrator` backed by a real `SessionStore` and the given
/// model provider, with no registered behaviors beyond the LLM-backed
/// fallback — the same wiring `main.rs` assembles in production.
async fn build_orchestrator(provider: Arc<dyn ModelProvider>, tool_registry: Arc<ToolRegistry>) -> (Orchestrator, Arc<Mutex<MemoryStream>>, Arc<SessionStore>, tempfile::TempDir) {
    let (store, dir) = session_store().await;
    let executor = Arc::new(ToolExecutor::new(tool_registry.clone(), ToolPolicy::default()));
    let agent_loop = Arc::new(AgentLoop::new(agent_config(), store.clone(), context_builder(true), provider, tool_registry, executor, HookRegistry::new()));

    let matcher = BehaviorMatcher::new(0.5, Arc::new(FallbackBehavior::new(Some(agent_loop), 0.1)));
    let bridge = Arc::new(BrainCerebellumBridge::new(true));
    let memories = Arc::new(Mutex::new(MemoryStream::new()));

    let orchestrator = Orchestrator::new(matcher, bridge, None, memories.clone(), store.clone(), ResetPolicyConfig::default(), "agent-1", "agent:agent-1:main");
    (orchestrator, memories, store, dir)
}

#[tokio::test]
async fn process_round_trips_through_mock_provider_and_persists_session() {
    let provider: Arc<dyn ModelProvider> = Arc::new(MockProvider);
    let registry = Arc::new(ToolRegistry::new());
    let (orchestrator, memories, _store, _dir) = build_orchestrator(provider, registry).await;

    let result = orchestrator.process("hello there").await;
    assert!(result.success);
    assert!(result.chat_response.contains("hello there"));

    // An observation memory is recorded for every processed utterance.
    assert_eq!(memories.lock().await.get_all().len(), 1);
}

#[tokio::test]
async fn process_resolves_session_key_into_a_real_session_and_reuses_it() {
    let provider: Arc<dyn ModelProvider> = Arc::new(MockProvider);
    let registry = Arc::new(ToolRegistry::new());
    let (orchestrator, _memories, store, _dir) = build_orchestrator(provider, registry).await;

    orchestrator.process("first turn").await;
    orchestrator.process("second turn").await;

    // Both turns landed in the same store-backed session: four persisted
    // messages (two user, two assistant), not two fresh sessions.
    let session = store.check_and_reset_session("agent:agent-1:main", None, &ResetPolicyConfig::default()).await.unwrap();
    let messages = store.get_messages(&session.session_id).await.unwrap();
    assert_eq!(messages.len(), 4);
}

#[tokio::test]
async fn process_through_tool_call_round_uses_memory_search_tool() {
    let mut registry = ToolRegistry::new();
    let memories = Arc::new(Mutex::new(MemoryStream::new()));
    memories.lock().await.create(Memory::new("the cup is in the kitchen", MemoryType::Fact, 7.0, vec![]));
    registry.register(MemoryWriteTool::new(memories.clone()));
    registry.register(MemorySearchTool::new(memories.clone(), RankerWeights::default()));
    registry.register(MemoryGetTool::new(memories.clone()));
    let registry = Arc::new(registry);

    let provider: Arc<dyn ModelProvider> =
        Arc::new(ScriptedMockProvider::tool_then_text("call-1", "memory_search", r#"{"query":"cup"}"#, "The cup is in the kitchen."));

    let (store, _dir) = session_store().await;
    let executor = Arc::new(ToolExecutor::new(registry.clone(), ToolPolicy::default()));
    let agent_loop = Arc::new(AgentLoop::new(agent_config(), store.clone(), context_builder(false), provider, registry, executor, HookRegistry::new()));

    let session = store.create_session(None, None, None, None, None, None, None).await.unwrap();
    let result = agent_loop.run(&session.session_id, "agent-1", "where is the cup?", None, QueueMode::Collect, None).await.unwrap();

    assert_eq!(result.tool_calls.len(), 1);
    assert_eq!(result.tool_calls[0].tool_name, "memory_search");
    assert!(result.response.contains("kitchen"));

    // The search bumped the matched memory's access stats.
    let stream = memories.lock().await;
    assert_eq!(stream.get_all()[0].access_count, 1);
}

#[tokio::test]
async fn rule_based_fallback_handles_navigation_without_an_agent_loop() {
    let matcher = BehaviorMatcher::new(0.5, Arc::new(FallbackBehavior::new(None, 0.1)));
    let bridge = Arc::new(BrainCerebellumBridge::new(true));
    let memories = Arc::new(Mutex::new(MemoryStream::new()));
    let (store, _dir) = session_store().await;

    let orchestrator = Orchestrator::new(matcher, bridge, None, memories, store, ResetPolicyConfig::default(), "agent-1", "agent:agent-1:main");

    let result = orchestrator.process("go to the kitchen").await;
    assert!(result.success);
    assert_eq!(result.ros2_commands.len(), 1);
    assert_eq!(result.ros2_commands[0].command_type, "navigate");
    assert_eq!(result.ros2_commands[0].parameters["target"], "the kitchen");
}

#[tokio::test]
async fn bridge_mock_mode_reports_every_dispatched_command_as_completed() {
    let bridge = BrainCerebellumBridge::new(true);
    let command = BrainCommand::new("forward", json!({}), "agent-1");
    let outcome = bridge.send_command(command, true, None).await;
    assert_eq!(outcome.status, orb_bridge::ExecutionStatus::Completed);
}

#[tokio::test]
async fn session_reset_policy_manual_trigger_starts_a_fresh_session() {
    let (store, _dir) = session_store().await;
    let policy = ResetPolicyConfig::Manual { triggers: vec!["/new".to_string()] };

    let first = store.check_and_reset_session("agent:agent-1:main", Some("hello"), &policy).await.unwrap();
    store.append_messages(&first.session_id, vec![orb_core::SessionMessage::user("hello")]).await.unwrap();

    let second = store.check_and_reset_session("agent:agent-1:main", Some("/new"), &policy).await.unwrap();
    assert_ne!(first.session_id, second.session_id);

    let third = store.check_and_reset_session("agent:agent-1:main", Some("anything else"), &policy).await.unwrap();
    assert_eq!(second.session_id, third.session_id);
}

#[tokio::test]
async fn tool_policy_deny_blocks_a_tool_even_when_registered() {
    let mut registry = ToolRegistry::new();
    let memories = Arc::new(Mutex::new(MemoryStream::new()));
    registry.register(MemoryWriteTool::new(memories));
    let registry = Arc::new(registry);

    let policy = ToolPolicy::new(vec!["*".into()], vec!["memory_write".into()], None);
    let executor = ToolExecutor::new(registry, policy);

    let call = ToolCall { id: "1".into(), name: "memory_write".into(), args: json!({ "description": "nope" }) };
    let result = executor.execute(&call, &ExecutionContext { agent_id: None }).await;
    assert_eq!(result.status, ToolStatus::Denied);
}
