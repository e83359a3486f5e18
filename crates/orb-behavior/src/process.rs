// SPDX-License-Identifier: Apache-2.0
//! The top-level orchestrator: matches a behavior for an utterance, forwards
//! any resulting commands to the bridge and broadcaster, records an
//! observation memory, and returns a structured result.
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use orb_bridge::{BrainCerebellumBridge, BrainCommand, CommandBroadcaster};
use orb_config::ResetPolicyConfig;
use orb_core::SessionStore;
use orb_memory::{Memory, MemoryStream, MemoryType};

use crate::behavior::{BehaviorContext, BehaviorMatcher, ProposedCommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Llm,
    Rule,
}

#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub trace_id: String,
    pub chat_response: String,
    pub ros2_commands: Vec<ProposedCommand>,
    pub behavior_name: String,
    pub success: bool,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub mode: ExecutionMode,
    pub metadata: Value,
}

pub struct Orchestrator {
    matcher: BehaviorMatcher,
    bridge: Arc<BrainCerebellumBridge>,
    broadcaster: Option<Arc<CommandBroadcaster>>,
    memories: Arc<Mutex<MemoryStream>>,
    session_store: Arc<SessionStore>,
    reset_policy: ResetPolicyConfig,
    agent_id: String,
    session_key: String,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        matcher: BehaviorMatcher,
        bridge: Arc<BrainCerebellumBridge>,
        broadcaster: Option<Arc<CommandBroadcaster>>,
        memories: Arc<Mutex<MemoryStream>>,
        session_store: Arc<SessionStore>,
        reset_policy: ResetPolicyConfig,
        agent_id: impl Into<String>,
        session_key: impl Into<String>,
    ) -> Self {
        Self {
            matcher,
            bridge,
            broadcaster,
            memories,
            session_store,
            reset_policy,
            agent_id: agent_id.into(),
            session_key: session_key.into(),
        }
    }

    /// Cancels every in-flight bridge command. Exposed so the harness can
    /// wire a panic button (CLI command, signal handler, ...) without
    /// reaching into the bridge directly.
    pub async fn emergency_stop(&self) -> usize {
        self.bridge.emergency_stop().await
    }

    pub async fn process(&self, user_input: &str) -> ProcessResult {
        let started = Instant::now();
        let trace_id = Uuid::new_v4().to_string();

        let session = match self.session_store.check_and_reset_session(&self.session_key, Some(user_input), &self.reset_policy).await {
            Ok(session) => session,
            Err(e) => {
                return ProcessResult {
                    trace_id,
                    chat_response: String::new(),
                    ros2_commands: Vec::new(),
                    behavior_name: String::new(),
                    success: false,
                    error: Some(format!("session store error: {e}")),
                    execution_time_ms: started.elapsed().as_millis() as u64,
                    mode: ExecutionMode::Rule,
                    metadata: Value::Null,
                };
            }
        };

        let memories_guard = self.memories.lock().await;
        let ctx = BehaviorContext { session_id: &session.session_id, agent_id: &self.agent_id, user_input, memories: Some(&*memories_guard) };
        let (behavior, _confidence) = self.matcher.select(user_input).await;
        let mode = if behavior.mode_hint() == "rule" { ExecutionMode::Rule } else { ExecutionMode::Llm };
        let behavior_name = behavior.name().to_string();

        let outcome = behavior.execute(&ctx).await;
        drop(memories_guard);

        let (chat_response, commands, success, error) = match outcome {
            Ok(output) => (output.chat_response, output.commands, true, None),
            Err(e) => (String::new(), Vec::new(), false, Some(e.to_string())),
        };

        for command in &commands {
            let brain_command = BrainCommand::new(command.command_type.clone(), command.parameters.clone(), self.agent_id.clone());
            let _ = self.bridge.send_command(brain_command.clone(), false, None).await;
            if let Some(broadcaster) = &self.broadcaster {
                broadcaster.broadcast_command(json!(brain_command)).await;
            }
        }

        let summary = format!("user said \"{user_input}\"; replied \"{chat_response}\" via {behavior_name}");
        self.memories.lock().await.create(Memory::new(summary, MemoryType::Observation, 3.0, vec!["interaction".to_string()]));

        ProcessResult {
            trace_id,
            chat_response,
            ros2_commands: commands,
            behavior_name,
            success,
            error,
            execution_time_ms: started.elapsed().as_millis() as u64,
            mode,
            metadata: Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::{Behavior, BehaviorOutput};
    use async_trait::async_trait;

    struct EchoBehavior;

    #[async_trait]
    impl Behavior for EchoBehavior {
        fn name(&self) -> &str {
            "echo"
        }

        async fn can_handle(&self, _utterance: &str) -> f32 {
            0.9
        }

        async fn execute(&self, ctx: &BehaviorContext<'_>) -> anyhow::Result<BehaviorOutput> {
            Ok(BehaviorOutput { chat_response: format!("echo: {}", ctx.user_input), commands: vec![ProposedCommand::new("forward", Value::Null)], steps: vec![] })
        }
    }

    struct FailingBehavior;

    #[async_trait]
    impl Behavior for FailingBehavior {
        fn name(&self) -> &str {
            "failing"
        }

        async fn can_handle(&self, _utterance: &str) -> f32 {
            0.9
        }

        async fn execute(&self, _ctx: &BehaviorContext<'_>) -> anyhow::Result<BehaviorOutput> {
            anyhow::bail!("boom")
        }
    }

    fn fallback() -> Arc<dyn Behavior> {
        struct Fallback;
        #[async_trait]
        impl Behavior for Fallback {
            fn name(&self) -> &str {
                "fallback"
            }
            async fn can_handle(&self, _utterance: &str) -> f32 {
                0.1
            }
            async fn execute(&self, _ctx: &BehaviorContext<'_>) -> anyhow::Result<BehaviorOutput> {
                Ok(BehaviorOutput::text_only("fallback reply"))
            }
        }
        Arc::new(Fallback)
    }

    fn test_session_store() -> (Arc<SessionStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (Arc::new(SessionStore::new(dir.path().to_path_buf()).unwrap()), dir)
    }

    #[tokio::test]
    async fn process_dispatches_commands_and_records_memory() {
        let mut matcher = BehaviorMatcher::new(0.5, fallback());
        matcher.register(Arc::new(EchoBehavior));
        let bridge = Arc::new(BrainCerebellumBridge::new(true));
        let memories = Arc::new(Mutex::new(MemoryStream::new()));
        let (session_store, _dir) = test_session_store();
        let orchestrator = Orchestrator::new(
            matcher,
            bridge,
            None,
            memories.clone(),
            session_store,
            ResetPolicyConfig::default(),
            "agent-1",
            "agent:agent-1:main",
        );

        let result = orchestrator.process("go forward please").await;
        assert!(result.success);
        assert_eq!(result.behavior_name, "echo");
        assert_eq!(result.ros2_commands.len(), 1);
        assert_eq!(memories.lock().await.get_all().len(), 1);
    }

    #[tokio::test]
    async fn process_reports_failure_when_behavior_errors() {
        let mut matcher = BehaviorMatcher::new(0.5, fallback());
        matcher.register(Arc::new(FailingBehavior));
        let bridge = Arc::new(BrainCerebellumBridge::new(true));
        let memories = Arc::new(Mutex::new(MemoryStream::new()));
        let (session_store, _dir) = test_session_store();
        let orchestrator = Orchestrator::new(
            matcher,
            bridge,
            None,
            memories,
            session_store,
            ResetPolicyConfig::default(),
            "agent-1",
            "agent:agent-1:main",
        );

        let result = orchestrator.process("anything").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("boom"));
    }
}
