// SPDX-License-Identifier: Apache-2.0
//! The phased agent run loop: INTAKE -> CONTEXT_ASSEMBLY -> INFERENCE ->
//! TOOL_EXECUTION? -> PERSISTENCE -> COMPLETED/ERROR, repeated across
//! iterations until the model stops requesting tools or a limit is hit.
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use orb_config::{AgentConfig, CompactorConfig};
use orb_memory::MemoryStream;
use orb_model::{CompletionRequest, ModelProvider, ResponseEvent, ToolSchema as ModelToolSchema};
use orb_tools::{ExecutionContext, ToolCall, ToolExecutor, ToolRegistry, ToolStatus};

use crate::compactor::{CompactionOutcome, Compactor};
use crate::context_builder::ContextBuilder;
use crate::session_store::{SessionMessage, SessionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    Collect,
    Steer,
    Followup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Intake,
    ContextAssembly,
    Inference,
    ToolExecution,
    Persistence,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Error,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub session_id: String,
    pub agent_id: String,
    pub user_input: String,
    pub model: Option<String>,
    pub phase: Phase,
    pub iteration: u32,
    pub tool_calls_count: u32,
    pub tokens_used: u64,
    pub pending_tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<orb_tools::ToolResult>,
    pub assistant_response: String,
    pub streaming_chunks: Vec<String>,
}

/// Cheap, owned snapshot of a `RunContext` passed to hooks.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub run_id: String,
    pub session_id: String,
    pub agent_id: String,
    pub phase: Phase,
    pub iteration: u32,
    pub tokens_used: u64,
    pub user_input: String,
    pub assistant_response: String,
}

impl RunContext {
    fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            run_id: self.run_id.clone(),
            session_id: self.session_id.clone(),
            agent_id: self.agent_id.clone(),
            phase: self.phase,
            iteration: self.iteration,
            tokens_used: self.tokens_used,
            user_input: self.user_input.clone(),
            assistant_response: self.assistant_response.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolCallSummary {
    pub tool_name: String,
    pub status: ToolStatus,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: String,
    pub session_id: String,
    pub status: RunStatus,
    pub response: String,
    pub tool_calls: Vec<ToolCallSummary>,
    pub tokens_used: u64,
    pub iterations: u32,
}

pub enum Hook {
    Sync(Arc<dyn Fn(&RunSnapshot) -> anyhow::Result<()> + Send + Sync>),
    Async(Arc<dyn Fn(RunSnapshot) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>),
}

#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<&'static str, Vec<Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, point: &'static str, hook: Hook) {
        self.hooks.entry(point).or_default().push(hook);
    }

    pub async fn fire(&self, point: &'static str, ctx: &RunContext) {
        let Some(hooks) = self.hooks.get(point) else { return };
        for hook in hooks {
            let result = match hook {
                Hook::Sync(f) => f(&ctx.snapshot()),
                Hook::Async(f) => f(ctx.snapshot()).await,
            };
            if let Err(e) = result {
                warn!(point, error = %e, "agent loop hook failed, continuing");
            }
        }
    }
}

fn model_tool_schemas(registry: &ToolRegistry) -> Vec<ModelToolSchema> {
    registry.schemas().into_iter().map(|s| ModelToolSchema { name: s.name, description: s.description, parameters: s.parameters }).collect()
}

struct SessionQueue {
    items: Mutex<VecDeque<String>>,
}

impl SessionQueue {
    fn new() -> Self {
        Self { items: Mutex::new(VecDeque::new()) }
    }
}

pub struct AgentLoop {
    config: AgentConfig,
    session_store: Arc<SessionStore>,
    context_builder: Arc<ContextBuilder>,
    provider: Arc<dyn ModelProvider>,
    tool_registry: Arc<ToolRegistry>,
    tool_executor: Arc<ToolExecutor>,
    hooks: HookRegistry,
    compactor: Compactor<Arc<SessionStore>>,
    run_locks: tokio::sync::RwLock<HashMap<String, Arc<Mutex<()>>>>,
    queues: tokio::sync::RwLock<HashMap<String, Arc<SessionQueue>>>,
    cancel_flags: tokio::sync::RwLock<HashMap<String, Arc<AtomicBool>>>,
    results: Mutex<VecDeque<RunResult>>,
    results_capacity: usize,
}

const RESULTS_RING_BUFFER_CAPACITY: usize = 200;

impl AgentLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AgentConfig,
        compactor_config: CompactorConfig,
        session_store: Arc<SessionStore>,
        context_builder: Arc<ContextBuilder>,
        provider: Arc<dyn ModelProvider>,
        tool_registry: Arc<ToolRegistry>,
        tool_executor: Arc<ToolExecutor>,
        hooks: HookRegistry,
    ) -> Self {
        let compactor = Compactor::new(compactor_config, session_store.clone());
        Self {
            config,
            session_store,
            context_builder,
            provider,
            tool_registry,
            tool_executor,
            hooks,
            compactor,
            run_locks: tokio::sync::RwLock::new(HashMap::new()),
            queues: tokio::sync::RwLock::new(HashMap::new()),
            cancel_flags: tokio::sync::RwLock::new(HashMap::new()),
            results: Mutex::new(VecDeque::new()),
            results_capacity: RESULTS_RING_BUFFER_CAPACITY,
        }
    }

    async fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.run_locks.read().await.get(session_id) {
            return lock.clone();
        }
        let mut locks = self.run_locks.write().await;
        locks.entry(session_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    async fn queue_for(&self, session_id: &str) -> Arc<SessionQueue> {
        if let Some(q) = self.queues.read().await.get(session_id) {
            return q.clone();
        }
        let mut queues = self.queues.write().await;
        queues.entry(session_id.to_string()).or_insert_with(|| Arc::new(SessionQueue::new())).clone()
    }

    /// Push a message onto a session's queue. Under `Collect`, callers simply
    /// await `run` directly (it naturally serializes on the run lock); this
    /// is for `Steer` (mid-run override) and `Followup` (run-after-run).
    pub async fn enqueue(&self, session_id: &str, input: impl Into<String>) {
        let queue = self.queue_for(session_id).await;
        queue.items.lock().await.push_back(input.into());
    }

    async fn cancel_flag_for(&self, run_id: &str) -> Arc<AtomicBool> {
        let mut flags = self.cancel_flags.write().await;
        flags.entry(run_id.to_string()).or_insert_with(|| Arc::new(AtomicBool::new(false))).clone()
    }

    pub async fn abort(&self, run_id: &str) {
        if let Some(flag) = self.cancel_flags.read().await.get(run_id) {
            flag.store(true, Ordering::SeqCst);
        }
    }

    async fn record_result(&self, result: RunResult) {
        let mut results = self.results.lock().await;
        if results.len() >= self.results_capacity {
            results.pop_front();
        }
        results.push_back(result);
    }

    pub async fn recent_results(&self) -> Vec<RunResult> {
        self.results.lock().await.iter().cloned().collect()
    }

    /// Runs one turn for `session_id`, serialized against any other run on
    /// the same session. `memories` is optional context injected by the
    /// caller (the top-level `process()` orchestrator owns the memory
    /// stream's lifetime).
    pub async fn run(
        &self,
        session_id: &str,
        agent_id: &str,
        user_input: &str,
        model: Option<String>,
        queue_mode: QueueMode,
        memories: Option<&MemoryStream>,
    ) -> anyhow::Result<RunResult> {
        let session_lock = self.lock_for(session_id).await;
        let _guard = session_lock.lock().await;

        let run_id = uuid::Uuid::new_v4().to_string();
        let cancel_flag = self.cancel_flag_for(&run_id).await;

        let mut ctx = RunContext {
            run_id: run_id.clone(),
            session_id: session_id.to_string(),
            agent_id: agent_id.to_string(),
            user_input: user_input.to_string(),
            model,
            phase: Phase::Intake,
            iteration: 0,
            tool_calls_count: 0,
            tokens_used: 0,
            pending_tool_calls: Vec::new(),
            tool_results: Vec::new(),
            assistant_response: String::new(),
            streaming_chunks: Vec::new(),
        };

        self.hooks.fire("before_run", &ctx).await;

        let exec_ctx = ExecutionContext { agent_id: Some(agent_id.to_string()) };
        let timeout = std::time::Duration::from_secs(self.config.run_timeout_seconds);

        let outcome = tokio::time::timeout(timeout, self.run_iterations(&mut ctx, queue_mode, memories, &exec_ctx, &cancel_flag)).await;
        let final_status = match outcome {
            Err(_) => RunStatus::Timeout,
            Ok(Err(_)) => {
                if cancel_flag.load(Ordering::SeqCst) {
                    RunStatus::Cancelled
                } else {
                    ctx.phase = Phase::Error;
                    RunStatus::Error
                }
            }
            Ok(Ok(())) => {
                if ctx.phase == Phase::Error {
                    RunStatus::Error
                } else {
                    RunStatus::Success
                }
            }
        };

        if matches!(final_status, RunStatus::Success | RunStatus::Error) {
            self.persist(&ctx).await;
        }

        self.hooks.fire("after_run", &ctx).await;
        self.cancel_flags.write().await.remove(&run_id);

        let result = RunResult {
            run_id: ctx.run_id.clone(),
            session_id: ctx.session_id.clone(),
            status: final_status,
            response: ctx.assistant_response.clone(),
            tool_calls: ctx.tool_results.iter().map(|r| ToolCallSummary { tool_name: r.tool_name.clone(), status: r.status }).collect(),
            tokens_used: ctx.tokens_used,
            iterations: ctx.iteration,
        };
        self.record_result(result.clone()).await;
        Ok(result)
    }

    /// Cooperative cancellation check used between every phase.
    fn check_cancelled(flag: &AtomicBool) -> anyhow::Result<()> {
        if flag.load(Ordering::SeqCst) {
            anyhow::bail!("run cancelled")
        }
        Ok(())
    }

    async fn run_iterations(
        &self,
        ctx: &mut RunContext,
        queue_mode: QueueMode,
        memories: Option<&MemoryStream>,
        exec_ctx: &ExecutionContext,
        cancel_flag: &Arc<AtomicBool>,
    ) -> anyhow::Result<()> {
        let queue = self.queue_for(&ctx.session_id).await;

        while ctx.iteration < self.config.max_iterations {
            Self::check_cancelled(cancel_flag)?;
            ctx.iteration += 1;
            ctx.phase = Phase::Intake;

            if ctx.iteration > 1 && queue_mode == QueueMode::Steer {
                if let Some(next) = queue.items.lock().await.pop_front() {
                    ctx.user_input = next;
                }
            }
            self.hooks.fire("after_intake", ctx).await;

            Self::check_cancelled(cancel_flag)?;
            ctx.phase = Phase::ContextAssembly;
            let history = self.session_store.get_recent_messages(&ctx.session_id, 200).await.unwrap_or_default();
            let system_prompt = "You are the reasoning core of a robot assistant. Reply conversationally and, when action is needed, request tools.";
            let messages = self.context_builder.build(system_prompt, &history, memories, None);
            self.hooks.fire("before_inference", ctx).await;

            Self::check_cancelled(cancel_flag)?;
            ctx.phase = Phase::Inference;
            let mut request = CompletionRequest { messages, tools: model_tool_schemas(&self.tool_registry), stream: true };
            request.messages.push(orb_model::Message::user(ctx.user_input.clone()));

            let mut stream = self.provider.complete(request).await?;
            ctx.pending_tool_calls.clear();
            let mut any_text = false;
            let mut tool_call_args: HashMap<u32, (String, String, String)> = HashMap::new();

            while let Some(event) = stream.next().await {
                Self::check_cancelled(cancel_flag)?;
                match event {
                    Ok(ResponseEvent::TextDelta(delta)) => {
                        any_text = true;
                        ctx.streaming_chunks.push(delta.clone());
                        ctx.assistant_response.push_str(&delta);
                    }
                    Ok(ResponseEvent::ToolCall { index, id, name, arguments }) => {
                        let entry = tool_call_args.entry(index).or_insert_with(|| (id.clone(), name.clone(), String::new()));
                        entry.2.push_str(&arguments);
                    }
                    Ok(ResponseEvent::Usage { input_tokens, output_tokens }) => {
                        ctx.tokens_used += (input_tokens + output_tokens) as u64;
                    }
                    Ok(ResponseEvent::Done) => break,
                    Ok(ResponseEvent::Error(msg)) => {
                        warn!(error = %msg, "inference stream reported a recoverable error");
                    }
                    Err(e) => {
                        error!(error = %e, "inference stream failed");
                        ctx.phase = Phase::Error;
                        return Ok(());
                    }
                }
            }

            let mut indices: Vec<u32> = tool_call_args.keys().copied().collect();
            indices.sort_unstable();
            for idx in indices {
                let (id, name, args_json) = tool_call_args.remove(&idx).unwrap();
                let args: Value = serde_json::from_str(&args_json).unwrap_or_else(|_| json!({}));
                ctx.pending_tool_calls.push(ToolCall { id, name, args });
            }

            let _ = any_text;
            self.hooks.fire("after_inference", ctx).await;

            if ctx.pending_tool_calls.is_empty() {
                break;
            }

            ctx.phase = Phase::ToolExecution;
            let calls = std::mem::take(&mut ctx.pending_tool_calls);
            for call in calls {
                if ctx.tool_calls_count >= self.config.max_tool_calls_per_turn {
                    break;
                }
                Self::check_cancelled(cancel_flag)?;
                self.hooks.fire("before_tool_call", ctx).await;
                let result = self.tool_executor.execute(&call, exec_ctx).await;
                ctx.tool_results.push(result);
                ctx.tool_calls_count += 1;
                self.hooks.fire("after_tool_call", ctx).await;

                if queue_mode == QueueMode::Steer && !queue.items.lock().await.is_empty() {
                    break;
                }
            }
        }

        Ok(())
    }

    async fn persist(&self, ctx: &RunContext) {
        self.hooks.fire("before_persistence", ctx).await;

        let mut messages = vec![SessionMessage::user(ctx.user_input.clone())];
        for result in &ctx.tool_results {
            let content = result.content.clone().or_else(|| result.error.clone()).unwrap_or_default();
            messages.push(SessionMessage::tool(result.call_id.clone(), result.tool_name.clone(), content));
        }
        messages.push(SessionMessage::assistant(ctx.assistant_response.clone()));

        if let Err(e) = self.session_store.append_messages(&ctx.session_id, messages).await {
            error!(session_id = %ctx.session_id, error = %e, "failed to persist run messages");
        }
        if let Err(e) = self.session_store.update_token_usage(&ctx.session_id, 0, ctx.tokens_used as u64).await {
            warn!(session_id = %ctx.session_id, error = %e, "failed to update token usage");
        }

        match self.compactor.maybe_compact(&ctx.session_id, self.provider.as_ref()).await {
            Ok(CompactionOutcome::NotNeeded) => {}
            Ok(outcome) => debug!(session_id = %ctx.session_id, ?outcome, "auto-compaction ran after persistence"),
            Err(e) => warn!(session_id = %ctx.session_id, error = %e, "auto-compaction check failed"),
        }
    }
}
