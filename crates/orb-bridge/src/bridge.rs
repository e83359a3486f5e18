// SPDX-License-Identifier: Apache-2.0
//! Translates high-level brain commands into cerebellum action sequences,
//! dispatches them to a transport, and aggregates per-action feedback back
//! into a command-level outcome.
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::json;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use orb_tools::{RiskMonitor, RiskSubject};

use crate::broadcaster::CommandBroadcaster;
use crate::translator::{BrainCommand, CerebellumFeedback, CommandPriority, ExecutionStatus, TranslatorRegistry};
use crate::transport::{is_failure, ActionTransport, ImmediateSuccessTransport};

/// The aggregate result of one `send_command` call.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub command_id: String,
    pub status: ExecutionStatus,
    pub feedback: Vec<CerebellumFeedback>,
    pub error: Option<String>,
}

impl CommandOutcome {
    fn failed(command_id: &str, error: impl Into<String>) -> Self {
        Self { command_id: command_id.to_string(), status: ExecutionStatus::Failed, feedback: Vec::new(), error: Some(error.into()) }
    }
}

struct PendingEntry {
    cancel: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

/// Bound on how many finished non-blocking outcomes are kept around for
/// `completed_outcome` lookups before the oldest are evicted.
const COMPLETED_RING_BUFFER_CAPACITY: usize = 200;

pub struct BrainCerebellumBridge {
    mock: bool,
    translators: TranslatorRegistry,
    risk_monitor: Arc<dyn RiskMonitor>,
    transport: Arc<dyn ActionTransport>,
    pending: Arc<RwLock<HashMap<String, PendingEntry>>>,
    completed: Arc<RwLock<VecDeque<CommandOutcome>>>,
    broadcaster: Option<Arc<CommandBroadcaster>>,
}

impl BrainCerebellumBridge {
    pub fn new(mock: bool) -> Self {
        Self {
            mock,
            translators: TranslatorRegistry::with_builtins(),
            risk_monitor: Arc::new(orb_tools::NoopRiskMonitor),
            transport: Arc::new(ImmediateSuccessTransport),
            pending: Arc::new(RwLock::new(HashMap::new())),
            completed: Arc::new(RwLock::new(VecDeque::new())),
            broadcaster: None,
        }
    }

    pub fn with_risk_monitor(mut self, monitor: Arc<dyn RiskMonitor>) -> Self {
        self.risk_monitor = monitor;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn ActionTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_translators(mut self, translators: TranslatorRegistry) -> Self {
        self.translators = translators;
        self
    }

    /// Attaches a broadcaster so lifecycle events (currently: emergency
    /// stops) are mirrored to connected subscribers as `system_status`
    /// messages.
    pub fn with_broadcaster(mut self, broadcaster: Arc<CommandBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    /// Outcome of a non-blocking dispatch once its background task has
    /// finished running actions, if it has. `None` while still executing,
    /// if `command_id` is unknown, or if it has aged out of the bounded
    /// ring buffer behind newer completions.
    pub async fn completed_outcome(&self, command_id: &str) -> Option<CommandOutcome> {
        self.completed.read().await.iter().find(|o| o.command_id == command_id).cloned()
    }

    /// Dispatches `cmd`. When `wait` is set, blocks (subject to `timeout`)
    /// until every derived action has reported a terminal status. When
    /// unset, the dispatch runs in the background and the returned outcome
    /// carries `status = EXECUTING` with no feedback yet collected.
    pub async fn send_command(&self, cmd: BrainCommand, wait: bool, timeout: Option<Duration>) -> CommandOutcome {
        let subject = RiskSubject::Command { command_type: cmd.command_type.clone(), parameters: cmd.parameters.clone() };
        let verdict = self.risk_monitor.assess(subject).await;
        if !verdict.allowed {
            return CommandOutcome::failed(&cmd.command_id, verdict.reason.unwrap_or_else(|| "denied by risk monitor".to_string()));
        }

        if self.mock {
            let feedback = CerebellumFeedback::success(&cmd.command_id, "mock-action");
            return CommandOutcome { command_id: cmd.command_id, status: ExecutionStatus::Completed, feedback: vec![feedback], error: None };
        }

        let actions = match self.translators.resolve(&cmd) {
            Some(translator) => translator.translate(&cmd),
            None => return CommandOutcome::failed(&cmd.command_id, format!("no translator for command_type {}", cmd.command_type)),
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let transport = self.transport.clone();
        let command_id = cmd.command_id.clone();
        let cancel_for_task = cancel.clone();

        let run_actions = move || async move {
            let mut feedback = Vec::with_capacity(actions.len());
            for action in &actions {
                if cancel_for_task.load(Ordering::SeqCst) {
                    feedback.push(CerebellumFeedback { status: ExecutionStatus::Cancelled, ..CerebellumFeedback::success(&command_id, &action.action_id) });
                    continue;
                }
                let result = tokio::time::timeout(Duration::from_millis(action.timeout_ms), transport.publish(&command_id, action)).await;
                match result {
                    Ok(fb) => feedback.push(fb),
                    Err(_) => feedback.push(CerebellumFeedback { status: ExecutionStatus::Timeout, ..CerebellumFeedback::success(&command_id, &action.action_id) }),
                }
            }
            feedback
        };

        if wait {
            let feedback = match timeout {
                Some(d) => match tokio::time::timeout(d, run_actions()).await {
                    Ok(fb) => fb,
                    Err(_) => return CommandOutcome { command_id: cmd.command_id, status: ExecutionStatus::Timeout, feedback: Vec::new(), error: Some("command timed out".into()) },
                },
                None => run_actions().await,
            };
            let status = aggregate_status(&feedback);
            self.pending.write().await.remove(&cmd.command_id);
            CommandOutcome { command_id: cmd.command_id, status, feedback, error: None }
        } else {
            let pending = self.pending.clone();
            let completed = self.completed.clone();
            let command_id_for_task = cmd.command_id.clone();
            let handle = tokio::spawn(async move {
                let feedback = run_actions().await;
                let status = aggregate_status(&feedback);
                pending.write().await.remove(&command_id_for_task);
                let mut completed = completed.write().await;
                if completed.len() >= COMPLETED_RING_BUFFER_CAPACITY {
                    completed.pop_front();
                }
                completed.push_back(CommandOutcome { command_id: command_id_for_task, status, feedback, error: None });
            });
            self.pending.write().await.insert(cmd.command_id.clone(), PendingEntry { cancel, task: Some(handle) });
            CommandOutcome { command_id: cmd.command_id, status: ExecutionStatus::Executing, feedback: Vec::new(), error: None }
        }
    }

    /// Cancels every pending (non-blocking) command by flipping its
    /// cooperative cancel flag and waiting for `run_actions` to unwind on
    /// its own, rather than aborting the task outright. Notifies the
    /// broadcaster, if attached, with a `system_status` lifecycle event.
    pub async fn emergency_stop(&self) -> usize {
        let entries: Vec<PendingEntry> = {
            let mut pending = self.pending.write().await;
            pending.drain().map(|(_, entry)| entry).collect()
        };
        let count = entries.len();
        for entry in &entries {
            entry.cancel.store(true, Ordering::SeqCst);
        }
        let tasks: Vec<JoinHandle<()>> = entries.into_iter().filter_map(|mut entry| entry.task.take()).collect();
        join_all(tasks).await;

        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.broadcast_status(json!({"event": "emergency_stop", "cancelled": count})).await;
        }

        count
    }
}

fn aggregate_status(feedback: &[CerebellumFeedback]) -> ExecutionStatus {
    if feedback.is_empty() {
        return ExecutionStatus::Failed;
    }
    if feedback.iter().any(|f| is_failure(f.status)) {
        if feedback.iter().any(|f| f.status == ExecutionStatus::Cancelled) {
            return ExecutionStatus::Cancelled;
        }
        if feedback.iter().any(|f| f.status == ExecutionStatus::Timeout) {
            return ExecutionStatus::Timeout;
        }
        return ExecutionStatus::Failed;
    }
    ExecutionStatus::Completed
}

#[allow(dead_code)]
fn default_priority() -> CommandPriority {
    CommandPriority::Normal
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    struct DenyAll;

    #[async_trait::async_trait]
    impl RiskMonitor for DenyAll {
        async fn assess(&self, _subject: RiskSubject) -> orb_tools::RiskVerdict {
            orb_tools::RiskVerdict::deny("too risky")
        }
    }

    #[tokio::test]
    async fn mock_mode_returns_synthetic_success_without_translating() {
        let bridge = BrainCerebellumBridge::new(true);
        let cmd = BrainCommand::new("unknown_type", Value::Null, "agent-1");
        let outcome = bridge.send_command(cmd, true, None).await;
        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert_eq!(outcome.feedback.len(), 1);
    }

    #[tokio::test]
    async fn unknown_command_type_fails_with_no_translator() {
        let bridge = BrainCerebellumBridge::new(false);
        let cmd = BrainCommand::new("juggle", Value::Null, "agent-1");
        let outcome = bridge.send_command(cmd, true, None).await;
        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert!(outcome.error.unwrap().contains("no translator"));
    }

    #[tokio::test]
    async fn risk_monitor_denial_skips_dispatch() {
        let bridge = BrainCerebellumBridge::new(false).with_risk_monitor(Arc::new(DenyAll));
        let cmd = BrainCommand::new("grasp", Value::Null, "agent-1");
        let outcome = bridge.send_command(cmd, true, None).await;
        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert!(outcome.feedback.is_empty());
    }

    #[tokio::test]
    async fn move_command_completes_with_one_feedback() {
        let bridge = BrainCerebellumBridge::new(false);
        let cmd = BrainCommand::new("move_to", Value::Null, "agent-1");
        let outcome = bridge.send_command(cmd, true, None).await;
        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert_eq!(outcome.feedback.len(), 1);
    }

    #[tokio::test]
    async fn grasp_command_completes_with_four_feedback_entries() {
        let bridge = BrainCerebellumBridge::new(false);
        let cmd = BrainCommand::new("grasp", Value::Null, "agent-1");
        let outcome = bridge.send_command(cmd, true, None).await;
        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert_eq!(outcome.feedback.len(), 4);
    }

    #[tokio::test]
    async fn non_blocking_dispatch_reports_executing_and_tracks_pending() {
        let bridge = BrainCerebellumBridge::new(false);
        let cmd = BrainCommand::new("move_to", Value::Null, "agent-1");
        let outcome = bridge.send_command(cmd, false, None).await;
        assert_eq!(outcome.status, ExecutionStatus::Executing);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bridge.pending_count().await, 0);
    }

    #[tokio::test]
    async fn emergency_stop_cancels_pending_commands() {
        let bridge = BrainCerebellumBridge::new(false);
        let cmd = BrainCommand::new("move_to", Value::Null, "agent-1");
        let _ = bridge.send_command(cmd, false, None).await;
        let cancelled = bridge.emergency_stop().await;
        assert_eq!(cancelled, 1);
        assert_eq!(bridge.pending_count().await, 0);
    }

    #[tokio::test]
    async fn emergency_stop_records_outcome_and_notifies_broadcaster() {
        let broadcaster = Arc::new(CommandBroadcaster::new("127.0.0.1", 0));
        let bridge = BrainCerebellumBridge::new(false).with_broadcaster(broadcaster.clone());
        let cmd = BrainCommand::new("move_to", Value::Null, "agent-1");
        let command_id = cmd.command_id.clone();
        let _ = bridge.send_command(cmd, false, None).await;

        let cancelled = bridge.emergency_stop().await;
        assert_eq!(cancelled, 1);

        let outcome = bridge.completed_outcome(&command_id).await.expect("task records its outcome before exiting");
        assert_eq!(outcome.status, ExecutionStatus::Cancelled);
        assert_eq!(broadcaster.get_stats().total_messages, 0, "status broadcasts don't bump the command counter");
    }
}
