// SPDX-License-Identifier: Apache-2.0
//! Creates and manages background agent runs derived from a parent session:
//! fire-and-forget sub-agent tasks with optional timeout, cancellation, and
//! announce-on-completion.
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::agent_loop::{AgentLoop, QueueMode};
use crate::session_store::SessionStore;

pub const ANNOUNCE_SKIP: &str = "ANNOUNCE_SKIP";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnStatus {
    Accepted,
    Running,
    Completed,
    Error,
    Timeout,
    Cancelled,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupMode {
    Keep,
    Delete,
}

#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub target: String,
    pub task: String,
    pub model: Option<String>,
    pub parent_session_id: String,
    /// 0 means no timeout.
    pub run_timeout_seconds: u64,
    pub announce: bool,
    pub cleanup: CleanupMode,
    pub archive_after_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct SpawnResult {
    pub spawn_id: String,
    pub status: SpawnStatus,
    pub session_id: String,
    pub session_key: String,
}

#[derive(Debug, Clone)]
pub struct AnnounceMessage {
    pub spawn_id: String,
    pub status: SpawnStatus,
    pub summary: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub runtime_seconds: f64,
    pub tokens_used: u64,
    pub session_key: String,
    pub session_id: String,
}

type AnnounceCallback = Arc<dyn Fn(AnnounceMessage) -> BoxFuture<'static, ()> + Send + Sync>;

struct SpawnRecord {
    session_id: String,
    session_key: String,
    parent_session_id: String,
    status: Mutex<SpawnStatus>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

pub struct SubAgentSpawner {
    session_store: Arc<SessionStore>,
    agent_loop: Arc<AgentLoop>,
    spawns: RwLock<HashMap<String, Arc<SpawnRecord>>>,
    announce_callbacks: RwLock<Vec<AnnounceCallback>>,
}

impl SubAgentSpawner {
    pub fn new(session_store: Arc<SessionStore>, agent_loop: Arc<AgentLoop>) -> Self {
        Self { session_store, agent_loop, spawns: RwLock::new(HashMap::new()), announce_callbacks: RwLock::new(Vec::new()) }
    }

    pub async fn on_announce(&self, callback: AnnounceCallback) {
        self.announce_callbacks.write().await.push(callback);
    }

    pub async fn spawn(&self, request: SpawnRequest) -> anyhow::Result<SpawnResult> {
        let spawn_id = uuid::Uuid::new_v4().to_string();
        let session_key = format!("agent:{}:subagent:{}", request.target, spawn_id);

        let mut metadata = Map::new();
        metadata.insert("is_subagent".into(), Value::Bool(true));
        metadata.insert("spawn_id".into(), Value::String(spawn_id.clone()));

        let sub_session = self
            .session_store
            .create_session(
                Some(session_key.clone()),
                None,
                None,
                request.model.clone(),
                Some(request.parent_session_id.clone()),
                Some("subagent".into()),
                Some(metadata),
            )
            .await?;

        let record = Arc::new(SpawnRecord {
            session_id: sub_session.session_id.clone(),
            session_key: session_key.clone(),
            parent_session_id: request.parent_session_id.clone(),
            status: Mutex::new(SpawnStatus::Accepted),
            join_handle: Mutex::new(None),
        });
        self.spawns.write().await.insert(spawn_id.clone(), record.clone());

        let agent_loop = self.agent_loop.clone();
        let session_store = self.session_store.clone();
        let task_record = record.clone();
        let task_value = request.task.clone();
        let session_id = sub_session.session_id.clone();
        let target = request.target.clone();
        let run_timeout_seconds = request.run_timeout_seconds;
        let announce_enabled = request.announce;
        let cleanup = request.cleanup;
        let archive_after_minutes = request.archive_after_minutes;
        let session_key_for_task = session_key.clone();
        let spawn_id_for_task = spawn_id.clone();

        let spawner_self_session_store = self.session_store.clone();
        let announce_callbacks: Vec<AnnounceCallback> = self.announce_callbacks.read().await.clone();

        let handle = tokio::spawn(async move {
            *task_record.status.lock().await = SpawnStatus::Running;
            let started = std::time::Instant::now();

            let run_future = agent_loop.run(&session_id, &target, &task_value, None, QueueMode::Collect, None);
            let outcome = if run_timeout_seconds > 0 {
                tokio::time::timeout(std::time::Duration::from_secs(run_timeout_seconds), run_future).await
            } else {
                Ok(run_future.await)
            };

            let runtime_seconds = started.elapsed().as_secs_f64();

            let (status, result_text, error_text, tokens_used) = match outcome {
                Err(_) => (SpawnStatus::Timeout, None, Some("sub-agent run timed out".to_string()), 0),
                Ok(Ok(run_result)) => match run_result.status {
                    crate::agent_loop::RunStatus::Success => (SpawnStatus::Completed, Some(run_result.response.clone()), None, run_result.tokens_used),
                    crate::agent_loop::RunStatus::Error => (SpawnStatus::Error, None, Some("sub-agent run failed".to_string()), run_result.tokens_used),
                    crate::agent_loop::RunStatus::Timeout => (SpawnStatus::Timeout, None, Some("sub-agent run timed out".to_string()), run_result.tokens_used),
                    crate::agent_loop::RunStatus::Cancelled => (SpawnStatus::Cancelled, None, None, run_result.tokens_used),
                },
                Ok(Err(e)) => (SpawnStatus::Error, None, Some(e.to_string()), 0),
            };

            let suppressed = result_text.as_deref() == Some(ANNOUNCE_SKIP);
            let final_status = if suppressed { SpawnStatus::Skipped } else { status };
            *task_record.status.lock().await = final_status;

            if let Err(e) = session_store.update_session_state(&session_id, crate::session_store::SessionState::Closed).await {
                warn!(spawn_id = %spawn_id_for_task, error = %e, "failed to close sub-session");
            }

            if announce_enabled && !suppressed {
                let summary = result_text.clone().unwrap_or_else(|| error_text.clone().unwrap_or_default());
                let message = AnnounceMessage {
                    spawn_id: spawn_id_for_task.clone(),
                    status: final_status,
                    summary,
                    result: result_text,
                    error: error_text,
                    runtime_seconds,
                    tokens_used,
                    session_key: session_key_for_task.clone(),
                    session_id: session_id.clone(),
                };
                for cb in announce_callbacks.iter() {
                    cb(message.clone()).await;
                }
            }

            match cleanup {
                CleanupMode::Delete => {
                    if let Err(e) = spawner_self_session_store.archive_session(&session_id).await {
                        warn!(spawn_id = %spawn_id_for_task, error = %e, "failed to archive sub-session on delete cleanup");
                    }
                }
                CleanupMode::Keep => {
                    if archive_after_minutes > 0 {
                        let store = spawner_self_session_store.clone();
                        let sid = session_id.clone();
                        let sp_id = spawn_id_for_task.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(std::time::Duration::from_secs((archive_after_minutes * 60) as u64)).await;
                            if let Err(e) = store.archive_session(&sid).await {
                                debug!(spawn_id = %sp_id, error = %e, "scheduled archival skipped (already archived?)");
                            }
                        });
                    }
                }
            }
        });

        *record.join_handle.lock().await = Some(handle);

        Ok(SpawnResult { spawn_id, status: SpawnStatus::Accepted, session_id: sub_session.session_id, session_key })
    }

    pub async fn status(&self, spawn_id: &str) -> Option<SpawnStatus> {
        let record = self.spawns.read().await.get(spawn_id).cloned()?;
        Some(*record.status.lock().await)
    }

    /// Cancel a running spawn: cooperative abort first, then hard-abort the
    /// task if it is still running after `timeout` (or immediately if
    /// `force`).
    pub async fn stop_spawn(&self, spawn_id: &str, timeout: std::time::Duration, force: bool) -> anyhow::Result<()> {
        let Some(record) = self.spawns.read().await.get(spawn_id).cloned() else {
            anyhow::bail!("unknown spawn id: {spawn_id}")
        };

        let mut status = record.status.lock().await;
        if *status != SpawnStatus::Running && *status != SpawnStatus::Accepted {
            return Ok(());
        }

        let mut handle_guard = record.join_handle.lock().await;
        if let Some(mut handle) = handle_guard.take() {
            if force {
                handle.abort();
            } else {
                tokio::select! {
                    result = &mut handle => { let _ = result; }
                    _ = tokio::time::sleep(timeout) => {
                        handle.abort();
                    }
                }
            }
        }
        *status = SpawnStatus::Cancelled;
        Ok(())
    }

    pub async fn stop_all_for_session(&self, parent_session_id: &str) {
        let spawns = self.spawns.read().await;
        for record in spawns.values() {
            if record.parent_session_id == parent_session_id {
                let mut handle_guard = record.join_handle.lock().await;
                if let Some(handle) = handle_guard.take() {
                    handle.abort();
                    *record.status.lock().await = SpawnStatus::Cancelled;
                }
            }
        }
    }

    pub async fn stop_all(&self) {
        let spawns = self.spawns.read().await;
        for record in spawns.values() {
            let mut handle_guard = record.join_handle.lock().await;
            if let Some(handle) = handle_guard.take() {
                handle.abort();
                *record.status.lock().await = SpawnStatus::Cancelled;
            }
        }
    }
}
