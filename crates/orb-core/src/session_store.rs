// SPDX-License-Identifier: Apache-2.0
//! Append-only per-session transcript storage with a metadata sidecar and a
//! cross-session key index, as described for the session store: one
//! `<id>.jsonl` transcript, one `<id>.meta.json` sidecar, and a single
//! `sessions.json` index mapping `session_key -> session_id`.
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use orb_config::ResetPolicyConfig;

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("corrupt transcript for session {session_id} at line {position}")]
    CorruptTranscript { session_id: String, position: usize },
    #[error("io error: {0}")]
    Io(String),
    #[error("session already archived: {0}")]
    AlreadyArchived(String),
}

pub type Result<T> = std::result::Result<T, SessionStoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Active,
    Paused,
    Compacting,
    Closed,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One line of a session transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl SessionMessage {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_call_id: None,
            tool_name: None,
            tool_result: None,
            metadata: Map::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn tool(tool_call_id: impl Into<String>, tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        let mut m = Self::new(MessageRole::Tool, content);
        m.tool_call_id = Some(tool_call_id.into());
        m.tool_name = Some(tool_name.into());
        m
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Session metadata, persisted verbatim as the `.meta.json` sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub session_key: String,
    pub state: SessionState,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub parent_session_id: Option<String>,
    pub channel: Option<String>,
    pub peer_id: Option<String>,
    pub origin: Option<String>,
    pub message_count: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

struct SessionRecord {
    meta: Session,
    messages: Vec<SessionMessage>,
}

/// Evaluates whether a session should be reset given its last activity and,
/// for `manual`, the incoming user input.
pub fn should_reset(policy: &ResetPolicyConfig, last_activity: DateTime<Utc>, user_input: Option<&str>, now: DateTime<Utc>) -> bool {
    match policy {
        ResetPolicyConfig::Never => false,
        ResetPolicyConfig::Manual { triggers } => user_input
            .map(|input| {
                let trimmed = input.trim_start();
                triggers.iter().any(|t| trimmed.to_lowercase().starts_with(&t.to_lowercase()))
            })
            .unwrap_or(false),
        ResetPolicyConfig::Idle { idle_minutes } => (now - last_activity).num_minutes() > *idle_minutes,
        ResetPolicyConfig::Daily { at_hour } => {
            let today_boundary = Utc
                .with_ymd_and_hms(now.year(), now.month(), now.day(), *at_hour, 0, 0)
                .single()
                .unwrap_or(now);
            let boundary = if now >= today_boundary { today_boundary } else { today_boundary - chrono::Duration::days(1) };
            last_activity < boundary
        }
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension(format!("{}.tmp", path.extension().and_then(|e| e.to_str()).unwrap_or("tmp")));
    {
        let mut f = std::fs::File::create(&tmp).map_err(|e| SessionStoreError::Io(e.to_string()))?;
        f.write_all(contents.as_bytes()).map_err(|e| SessionStoreError::Io(e.to_string()))?;
    }
    std::fs::rename(&tmp, path).map_err(|e| SessionStoreError::Io(e.to_string()))?;
    Ok(())
}

fn timestamp_suffix(now: DateTime<Utc>) -> String {
    format!("{:04}{:02}{:02}{:02}{:02}{:02}", now.year(), now.month(), now.day(), now.hour(), now.minute(), now.second())
}

pub struct SessionStore {
    base_dir: PathBuf,
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionRecord>>>>,
    index: RwLock<HashMap<String, String>>,
}

impl SessionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        let index_path = base_dir.join("sessions.json");
        let index: HashMap<String, String> = if index_path.is_file() {
            let text = std::fs::read_to_string(&index_path)?;
            serde_json::from_str(&text).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Self { base_dir, sessions: RwLock::new(HashMap::new()), index: RwLock::new(index) })
    }

    fn transcript_path(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{session_id}.jsonl"))
    }

    fn meta_path(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{session_id}.meta.json"))
    }

    fn index_path(&self) -> PathBuf {
        self.base_dir.join("sessions.json")
    }

    async fn write_index(&self) -> Result<()> {
        let index = self.index.read().await;
        let text = serde_json::to_string_pretty(&*index).map_err(|e| SessionStoreError::Io(e.to_string()))?;
        write_atomic(&self.index_path(), &text)
    }

    fn write_meta(&self, meta: &Session) -> Result<()> {
        let text = serde_json::to_string_pretty(meta).map_err(|e| SessionStoreError::Io(e.to_string()))?;
        write_atomic(&self.meta_path(&meta.session_id), &text)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_session(
        &self,
        session_key: Option<String>,
        channel: Option<String>,
        peer_id: Option<String>,
        model: Option<String>,
        parent_session_id: Option<String>,
        origin: Option<String>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<Session> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let session_key = session_key.unwrap_or_else(|| format!("agent:default:main"));
        let meta = Session {
            session_id: session_id.clone(),
            session_key: session_key.clone(),
            state: SessionState::Created,
            model,
            created_at: now,
            last_activity: now,
            parent_session_id,
            channel,
            peer_id,
            origin,
            message_count: 0,
            input_tokens: 0,
            output_tokens: 0,
            metadata: metadata.unwrap_or_default(),
        };

        std::fs::File::create(self.transcript_path(&session_id)).map_err(|e| SessionStoreError::Io(e.to_string()))?;
        self.write_meta(&meta)?;

        self.index.write().await.insert(session_key, session_id.clone());
        self.write_index().await?;

        self.sessions
            .write()
            .await
            .insert(session_id.clone(), Arc::new(Mutex::new(SessionRecord { meta: meta.clone(), messages: Vec::new() })));

        debug!(session_id = %session_id, "session created");
        Ok(meta)
    }

    async fn record_for(&self, session_id: &str) -> Result<Arc<Mutex<SessionRecord>>> {
        if let Some(rec) = self.sessions.read().await.get(session_id) {
            return Ok(rec.clone());
        }
        // Not cached: load from disk.
        let meta_path = self.meta_path(session_id);
        if !meta_path.is_file() {
            return Err(SessionStoreError::NotFound(session_id.to_string()));
        }
        let text = std::fs::read_to_string(&meta_path).map_err(|e| SessionStoreError::Io(e.to_string()))?;
        let meta: Session = serde_json::from_str(&text).map_err(|e| SessionStoreError::Io(e.to_string()))?;
        let messages = self.load_transcript(session_id)?;
        let rec = Arc::new(Mutex::new(SessionRecord { meta, messages }));
        self.sessions.write().await.insert(session_id.to_string(), rec.clone());
        Ok(rec)
    }

    fn load_transcript(&self, session_id: &str) -> Result<Vec<SessionMessage>> {
        let path = self.transcript_path(session_id);
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&path).map_err(|e| SessionStoreError::Io(e.to_string()))?;
        let mut messages = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let msg: SessionMessage = serde_json::from_str(line)
                .map_err(|_| SessionStoreError::CorruptTranscript { session_id: session_id.to_string(), position: i })?;
            messages.push(msg);
        }
        Ok(messages)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        let rec = self.record_for(session_id).await?;
        let rec = rec.lock().await;
        Ok(rec.meta.clone())
    }

    pub async fn find_session_by_key(&self, session_key: &str) -> Option<String> {
        self.index.read().await.get(session_key).cloned()
    }

    /// Append one message: a single JSON line plus a metadata rewrite, under
    /// this session's write lock.
    pub async fn append_message(&self, session_id: &str, message: SessionMessage) -> Result<()> {
        self.append_messages(session_id, vec![message]).await
    }

    pub async fn append_messages(&self, session_id: &str, messages: Vec<SessionMessage>) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let rec = self.record_for(session_id).await?;
        let mut rec = rec.lock().await;

        let path = self.transcript_path(session_id);
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).map_err(|e| SessionStoreError::Io(e.to_string()))?;
        for msg in &messages {
            let line = serde_json::to_string(msg).map_err(|e| SessionStoreError::Io(e.to_string()))?;
            writeln!(file, "{line}").map_err(|e| SessionStoreError::Io(e.to_string()))?;
        }

        let became_active = rec.meta.state == SessionState::Created && messages.iter().any(|m| m.role == MessageRole::User);
        rec.meta.message_count += messages.len();
        rec.meta.last_activity = Utc::now();
        if became_active {
            rec.meta.state = SessionState::Active;
        }
        self.write_meta(&rec.meta)?;
        rec.messages.extend(messages);
        Ok(())
    }

    pub async fn get_messages(&self, session_id: &str) -> Result<Vec<SessionMessage>> {
        let rec = self.record_for(session_id).await?;
        let rec = rec.lock().await;
        Ok(rec.messages.clone())
    }

    pub async fn get_recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<SessionMessage>> {
        let rec = self.record_for(session_id).await?;
        let rec = rec.lock().await;
        let start = rec.messages.len().saturating_sub(limit);
        Ok(rec.messages[start..].to_vec())
    }

    pub async fn update_session_state(&self, session_id: &str, state: SessionState) -> Result<()> {
        let rec = self.record_for(session_id).await?;
        let mut rec = rec.lock().await;
        rec.meta.state = state;
        self.write_meta(&rec.meta)
    }

    pub async fn update_token_usage(&self, session_id: &str, input_tokens: u64, output_tokens: u64) -> Result<()> {
        let rec = self.record_for(session_id).await?;
        let mut rec = rec.lock().await;
        rec.meta.input_tokens += input_tokens;
        rec.meta.output_tokens += output_tokens;
        rec.meta.last_activity = Utc::now();
        self.write_meta(&rec.meta)
    }

    /// Replace the transcript with `new_messages`: rename to `.backup`, write
    /// the new transcript, replace metadata, delete the backup on success; on
    /// any failure, restore the backup.
    pub async fn compact_session(&self, session_id: &str, new_messages: Vec<SessionMessage>) -> Result<()> {
        let rec = self.record_for(session_id).await?;
        let mut rec = rec.lock().await;

        let transcript = self.transcript_path(session_id);
        let backup = self.base_dir.join(format!("{session_id}.backup.jsonl"));

        std::fs::rename(&transcript, &backup).map_err(|e| SessionStoreError::Io(e.to_string()))?;

        let write_result = (|| -> Result<()> {
            let mut file = std::fs::File::create(&transcript).map_err(|e| SessionStoreError::Io(e.to_string()))?;
            for msg in &new_messages {
                let line = serde_json::to_string(msg).map_err(|e| SessionStoreError::Io(e.to_string()))?;
                writeln!(file, "{line}").map_err(|e| SessionStoreError::Io(e.to_string()))?;
            }
            Ok(())
        })();

        match write_result {
            Ok(()) => {
                rec.meta.message_count = new_messages.len();
                rec.meta.last_activity = Utc::now();
                self.write_meta(&rec.meta)?;
                rec.messages = new_messages;
                let _ = std::fs::remove_file(&backup);
                Ok(())
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "compaction write failed, restoring backup");
                let _ = std::fs::remove_file(&transcript);
                std::fs::rename(&backup, &transcript).map_err(|e| SessionStoreError::Io(e.to_string()))?;
                Err(e)
            }
        }
    }

    /// Rename transcript and metadata to `.archived.<timestamp>.*` and drop
    /// in-memory caches for this session.
    pub async fn archive_session(&self, session_id: &str) -> Result<()> {
        let rec = self.record_for(session_id).await?;
        {
            let mut rec = rec.lock().await;
            if rec.meta.state == SessionState::Archived {
                return Err(SessionStoreError::AlreadyArchived(session_id.to_string()));
            }
            let now = Utc::now();
            let suffix = timestamp_suffix(now);
            let transcript = self.transcript_path(session_id);
            let meta_path = self.meta_path(session_id);
            let archived_transcript = self.base_dir.join(format!("{session_id}.archived.{suffix}.jsonl"));
            let archived_meta = self.base_dir.join(format!("{session_id}.archived.{suffix}.json"));

            if transcript.is_file() {
                std::fs::rename(&transcript, &archived_transcript).map_err(|e| SessionStoreError::Io(e.to_string()))?;
            }
            rec.meta.state = SessionState::Archived;
            let text = serde_json::to_string_pretty(&rec.meta).map_err(|e| SessionStoreError::Io(e.to_string()))?;
            write_atomic(&archived_meta, &text)?;
            let _ = std::fs::remove_file(&meta_path);
        }
        self.sessions.write().await.remove(session_id);
        Ok(())
    }

    /// `check_and_reset_session`: create a session if none exists for
    /// `session_key`; else archive + recreate on a reset trigger; else
    /// return the current session unchanged.
    pub async fn check_and_reset_session(&self, session_key: &str, user_input: Option<&str>, policy: &ResetPolicyConfig) -> Result<Session> {
        let Some(session_id) = self.find_session_by_key(session_key).await else {
            return self.create_session(Some(session_key.to_string()), None, None, None, None, None, None).await;
        };
        let current = self.get_session(&session_id).await?;
        if should_reset(policy, current.last_activity, user_input, Utc::now()) {
            self.archive_session(&session_id).await?;
            self.create_session(Some(session_key.to_string()), current.channel, current.peer_id, current.model, None, current.origin, None).await
        } else {
            Ok(current)
        }
    }

    /// Archive sessions older than `max_age_days`, or beyond `max_sessions`
    /// keeping the most-recently-updated.
    pub async fn prune_old_sessions(&self, max_age_days: i64, max_sessions: Option<usize>) -> Result<usize> {
        let index = self.index.read().await.clone();
        let mut sessions = Vec::new();
        for (_, session_id) in index {
            if let Ok(meta) = self.get_session(&session_id).await {
                if meta.state != SessionState::Archived {
                    sessions.push(meta);
                }
            }
        }
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));

        let now = Utc::now();
        let mut to_archive: Vec<String> = Vec::new();
        for (i, meta) in sessions.iter().enumerate() {
            let too_old = (now - meta.last_activity).num_days() > max_age_days;
            let over_cap = max_sessions.map(|cap| i >= cap).unwrap_or(false);
            if too_old || over_cap {
                to_archive.push(meta.session_id.clone());
            }
        }
        let count = to_archive.len();
        for id in to_archive {
            let _ = self.archive_session(&id).await;
        }
        Ok(count)
    }
}
