// SPDX-License-Identifier: Apache-2.0
//! Keeps a session's transcript inside its context window: first pruning
//! stale tool results in place, then — if still over threshold — replacing
//! the oldest portion of the transcript with a single summary message.
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, warn};

use orb_config::CompactorConfig;
use orb_model::{CompletionRequest, Message, ModelProvider, ResponseEvent, Role};

use crate::session_store::{MessageRole, SessionMessage, SessionStore};

/// The capability surface the compactor needs from a session store: read the
/// transcript, and atomically replace it. Kept narrow so the compactor never
/// reaches past it into session lifecycle or indexing concerns.
#[async_trait]
pub trait CompactionStore: Send + Sync {
    async fn messages(&self, session_id: &str) -> anyhow::Result<Vec<SessionMessage>>;
    async fn replace(&self, session_id: &str, messages: Vec<SessionMessage>) -> anyhow::Result<()>;
}

#[async_trait]
impl CompactionStore for SessionStore {
    async fn messages(&self, session_id: &str) -> anyhow::Result<Vec<SessionMessage>> {
        Ok(self.get_messages(session_id).await?)
    }

    async fn replace(&self, session_id: &str, messages: Vec<SessionMessage>) -> anyhow::Result<()> {
        Ok(self.compact_session(session_id, messages).await?)
    }
}

#[async_trait]
impl<T: CompactionStore + ?Sized> CompactionStore for std::sync::Arc<T> {
    async fn messages(&self, session_id: &str) -> anyhow::Result<Vec<SessionMessage>> {
        (**self).messages(session_id).await
    }

    async fn replace(&self, session_id: &str, messages: Vec<SessionMessage>) -> anyhow::Result<()> {
        (**self).replace(session_id, messages).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// Transcript was under threshold; nothing changed.
    NotNeeded,
    /// Stale tool results were truncated in place, no summarization needed.
    Pruned,
    /// The oldest portion was replaced by a summary message.
    Summarized,
}

pub struct Compactor<S: CompactionStore> {
    config: CompactorConfig,
    store: S,
}

fn estimate_tokens(_config: &CompactorConfig, text: &str) -> u32 {
    orb_model::tokens_for(text) as u32
}

fn total_tokens(config: &CompactorConfig, messages: &[SessionMessage]) -> u32 {
    messages.iter().map(|m| estimate_tokens(config, &m.content)).sum()
}

/// `tokens >= context_window - reserve - soft_threshold`: the earlier of the
/// two triggers, meant to prompt a memory flush well before compaction is
/// strictly necessary.
fn should_memory_flush(config: &CompactorConfig, tokens: u32) -> bool {
    let threshold = config.context_window.saturating_sub(config.reserve_tokens_floor).saturating_sub(config.soft_threshold_tokens);
    tokens >= threshold
}

/// `tokens >= context_window - reserve`: the hard gate past which a session
/// must be compacted before its next inference call.
fn should_compact(config: &CompactorConfig, tokens: u32) -> bool {
    tokens >= config.context_window.saturating_sub(config.reserve_tokens_floor)
}

const TRUNCATION_SUFFIX_MARKER: &str = "(truncated, original ";

fn prune_stale_tool_results(config: &CompactorConfig, messages: &mut [SessionMessage]) -> bool {
    if !config.prune_old_tool_results {
        return false;
    }
    let mut turn = 0u32;
    let mut turn_of = vec![0u32; messages.len()];
    for (i, m) in messages.iter().enumerate() {
        if m.role == MessageRole::User {
            turn += 1;
        }
        turn_of[i] = turn;
    }
    let current_turn = turn;
    let mut pruned_any = false;
    for (i, m) in messages.iter_mut().enumerate() {
        if m.role != MessageRole::Tool {
            continue;
        }
        if m.content.contains(TRUNCATION_SUFFIX_MARKER) {
            continue;
        }
        let age = current_turn.saturating_sub(turn_of[i]);
        let original_len = m.content.chars().count();
        if age > config.tool_result_max_age_turns && original_len > config.tool_result_max_chars {
            let kept: String = m.content.chars().take(config.tool_result_max_chars).collect();
            m.content = format!("{kept}\n... {TRUNCATION_SUFFIX_MARKER}{original_len} chars)");
            pruned_any = true;
        }
    }
    pruned_any
}

/// Finds the split point nearest to `target` that does not separate a tool
/// message from the assistant message that requested it — the LLM's context
/// requires every tool result to be immediately preceded by its call.
fn adjust_split_point(messages: &[SessionMessage], target: usize) -> usize {
    let mut split = target.min(messages.len());
    while split > 0 && split < messages.len() && messages[split].role == MessageRole::Tool {
        split -= 1;
    }
    split
}

const RULE_SUMMARY_LINE_MAX_CHARS: usize = 200;

fn truncate_for_summary(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= RULE_SUMMARY_LINE_MAX_CHARS {
        text.to_string()
    } else {
        let head: String = text.chars().take(RULE_SUMMARY_LINE_MAX_CHARS).collect();
        format!("{head}...")
    }
}

/// Degraded path when the LLM summarizer is unavailable: a bare concatenation
/// of up to the last five user messages and last three assistant messages,
/// each truncated, in original order.
fn rule_based_summary(messages: &[SessionMessage]) -> String {
    let mut last_users: Vec<&SessionMessage> = messages.iter().filter(|m| m.role == MessageRole::User).rev().take(5).collect();
    last_users.reverse();
    let mut last_assistants: Vec<&SessionMessage> = messages.iter().filter(|m| m.role == MessageRole::Assistant).rev().take(3).collect();
    last_assistants.reverse();

    let mut lines = vec!["## 对话摘要".to_string()];
    for m in last_users {
        lines.push(format!("- 用户: {}", truncate_for_summary(&m.content)));
    }
    for m in last_assistants {
        lines.push(format!("- 助手: {}", truncate_for_summary(&m.content)));
    }
    lines.join("\n")
}

fn session_message_to_model_message(m: &SessionMessage) -> Message {
    match m.role {
        MessageRole::System => Message::system(m.content.clone()),
        MessageRole::User => Message::user(m.content.clone()),
        MessageRole::Assistant => Message::assistant(m.content.clone()),
        MessageRole::Tool => Message::tool_result(m.tool_call_id.clone().unwrap_or_default(), m.content.clone()),
    }
}

impl<S: CompactionStore> Compactor<S> {
    pub fn new(config: CompactorConfig, store: S) -> Self {
        Self { config, store }
    }

    /// Asks `provider` to summarize `messages` in at most `summary_max_tokens`
    /// tokens. Falls back to a rule-based summary if the provider errors or
    /// the stream produces no text.
    async fn summarize(&self, provider: &dyn ModelProvider, messages: &[SessionMessage]) -> String {
        let mut prompt_messages = vec![Message::system(
            "Summarize the following conversation concisely, preserving facts, decisions, and any open tasks. Do not include commentary about this instruction.",
        )];
        prompt_messages.extend(messages.iter().map(session_message_to_model_message));

        let request = CompletionRequest { messages: prompt_messages, tools: Vec::new(), stream: true };

        let stream = match provider.complete(request).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "compaction summarizer call failed, using rule-based summary");
                return rule_based_summary(messages);
            }
        };
        tokio::pin!(stream);

        let mut summary = String::new();
        while let Some(event) = stream.next().await {
            match event {
                Ok(ResponseEvent::TextDelta(delta)) => summary.push_str(&delta),
                Ok(ResponseEvent::Done) => break,
                Ok(ResponseEvent::Error(msg)) => {
                    warn!(error = %msg, "compaction summarizer stream error");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "compaction summarizer stream failed");
                    break;
                }
            }
        }

        let max_chars = (self.config.summary_max_tokens as f32 * self.config.chars_per_token) as usize;
        if summary.chars().count() > max_chars {
            summary = summary.chars().take(max_chars).collect();
        }
        if summary.trim().is_empty() {
            rule_based_summary(messages)
        } else {
            summary
        }
    }

    /// Runs the full compaction policy: prune first, then summarize if still
    /// over the soft token threshold. Returns what (if anything) changed.
    pub async fn maybe_compact(&self, session_id: &str, provider: &dyn ModelProvider) -> anyhow::Result<CompactionOutcome> {
        let mut messages = self.store.messages(session_id).await?;
        if messages.is_empty() {
            return Ok(CompactionOutcome::NotNeeded);
        }

        let before = total_tokens(&self.config, &messages);
        if !should_compact(&self.config, before) {
            return Ok(CompactionOutcome::NotNeeded);
        }

        let pruned = prune_stale_tool_results(&self.config, &mut messages);
        let after_prune = total_tokens(&self.config, &messages);
        if pruned {
            self.store.replace(session_id, messages.clone()).await?;
        }
        if !should_compact(&self.config, after_prune) {
            debug!(session_id, before, after_prune, "compaction satisfied by pruning alone");
            return Ok(if pruned { CompactionOutcome::Pruned } else { CompactionOutcome::NotNeeded });
        }

        let keep_from_end = ((messages.len() as f32) * (1.0 - self.config.compaction_ratio)).round() as usize;
        let target_split = messages.len().saturating_sub(keep_from_end);
        let split = adjust_split_point(&messages, target_split).max(1).min(messages.len().saturating_sub(1).max(1));

        let (old, recent) = messages.split_at(split);
        if old.is_empty() {
            return Ok(if pruned { CompactionOutcome::Pruned } else { CompactionOutcome::NotNeeded });
        }

        let summary_text = self.summarize(provider, old).await;
        let header = format!("[对话摘要 — compressed at {}]", chrono::Utc::now().to_rfc3339());
        let mut summary_message = SessionMessage::system(format!("{header}\n\n{summary_text}"));
        summary_message = summary_message.with_metadata("is_compaction_summary", serde_json::Value::Bool(true));

        let mut new_messages = vec![summary_message];
        new_messages.extend_from_slice(recent);

        self.store.replace(session_id, new_messages).await?;
        debug!(session_id, before, dropped = old.len(), kept = recent.len(), "compaction summarized oldest messages");
        Ok(CompactionOutcome::Summarized)
    }

    /// `tokens >= context_window - reserve - soft_threshold`: signals that a
    /// memory flush (writing durable observations before context is lost)
    /// should happen soon, ahead of the harder [`Compactor::should_compact`]
    /// gate.
    pub async fn should_memory_flush(&self, session_id: &str) -> anyhow::Result<bool> {
        let messages = self.store.messages(session_id).await?;
        Ok(should_memory_flush(&self.config, total_tokens(&self.config, &messages)))
    }

    /// `tokens >= context_window - reserve`: whether `maybe_compact` would
    /// act on this session right now.
    pub async fn should_compact(&self, session_id: &str) -> anyhow::Result<bool> {
        let messages = self.store.messages(session_id).await?;
        Ok(should_compact(&self.config, total_tokens(&self.config, &messages)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use orb_model::MockProvider;

    struct FakeStore {
        messages: StdMutex<Vec<SessionMessage>>,
    }

    #[async_trait]
    impl CompactionStore for FakeStore {
        async fn messages(&self, _session_id: &str) -> anyhow::Result<Vec<SessionMessage>> {
            Ok(self.messages.lock().unwrap().clone())
        }
        async fn replace(&self, _session_id: &str, messages: Vec<SessionMessage>) -> anyhow::Result<()> {
            *self.messages.lock().unwrap() = messages;
            Ok(())
        }
    }

    fn small_config() -> CompactorConfig {
        CompactorConfig {
            context_window: 220,
            reserve_tokens_floor: 30,
            soft_threshold_tokens: 50,
            prune_old_tool_results: true,
            tool_result_max_age_turns: 2,
            tool_result_max_chars: 20,
            compaction_ratio: 0.5,
            summary_max_tokens: 50,
            chars_per_token: 4.0,
        }
    }

    fn msgs(n: usize) -> Vec<SessionMessage> {
        (0..n)
            .map(|i| if i % 2 == 0 { SessionMessage::user(format!("question number {i} is fairly long text")) } else { SessionMessage::assistant(format!("answer number {i} is also fairly long text")) })
            .collect()
    }

    #[tokio::test]
    async fn under_threshold_is_not_needed() {
        let store = FakeStore { messages: StdMutex::new(vec![SessionMessage::user("hi")]) };
        let compactor = Compactor::new(small_config(), store);
        let provider = MockProvider::default();
        let outcome = compactor.maybe_compact("s1", &provider).await.unwrap();
        assert_eq!(outcome, CompactionOutcome::NotNeeded);
    }

    #[tokio::test]
    async fn over_threshold_triggers_summarization_and_keeps_tail() {
        let store = FakeStore { messages: StdMutex::new(msgs(20)) };
        let compactor = Compactor::new(small_config(), store);
        let provider = MockProvider::default();
        let outcome = compactor.maybe_compact("s1", &provider).await.unwrap();
        assert_eq!(outcome, CompactionOutcome::Summarized);
        let remaining = compactor.store.messages("s1").await.unwrap();
        assert!(remaining.len() < 20);
        assert!(remaining[0].metadata.get("is_compaction_summary").is_some());
        assert_eq!(remaining.last().unwrap().content, msgs(20).last().unwrap().content);
    }

    #[test]
    fn prune_truncates_only_old_oversized_tool_results() {
        let config = small_config();
        let original = "x".repeat(50);
        let mut messages = vec![
            SessionMessage::user("u1"),
            SessionMessage::tool("c1", "shell", original.clone()),
            SessionMessage::user("u2"),
            SessionMessage::user("u3"),
            SessionMessage::user("u4"),
        ];
        let pruned = prune_stale_tool_results(&config, &mut messages);
        assert!(pruned);
        // original content is kept up to the configured limit, not discarded.
        assert!(messages[1].content.starts_with(&original[..config.tool_result_max_chars]));
        assert!(messages[1].content.contains(TRUNCATION_SUFFIX_MARKER));
        assert!(messages[1].content.contains("original 50 chars"));
    }

    #[test]
    fn prune_leaves_recent_tool_results_untouched() {
        let config = small_config();
        let mut messages = vec![SessionMessage::user("u1"), SessionMessage::tool("c1", "shell", "x".repeat(50))];
        let pruned = prune_stale_tool_results(&config, &mut messages);
        assert!(!pruned);
        assert!(!messages[1].content.contains(TRUNCATION_SUFFIX_MARKER));
    }

    #[test]
    fn prune_is_idempotent_on_already_truncated_content() {
        let config = small_config();
        let mut messages = vec![
            SessionMessage::user("u1"),
            SessionMessage::tool("c1", "shell", "x".repeat(50)),
            SessionMessage::user("u2"),
            SessionMessage::user("u3"),
            SessionMessage::user("u4"),
        ];
        prune_stale_tool_results(&config, &mut messages);
        let once = messages[1].content.clone();
        let pruned_again = prune_stale_tool_results(&config, &mut messages);
        assert!(!pruned_again);
        assert_eq!(messages[1].content, once);
    }

    #[test]
    fn split_point_never_separates_tool_result_from_its_call() {
        let messages = vec![
            SessionMessage::user("u1"),
            SessionMessage::assistant("calling tool"),
            SessionMessage::tool("c1", "shell", "result"),
            SessionMessage::user("u2"),
        ];
        let split = adjust_split_point(&messages, 3);
        assert_ne!(messages[split.min(messages.len() - 1)].role, MessageRole::Tool);
    }

    #[test]
    fn rule_based_summary_concatenates_recent_messages_with_header() {
        let messages = vec![
            SessionMessage::user("first question"),
            SessionMessage::assistant("first answer"),
            SessionMessage::user("second question"),
            SessionMessage::assistant("second answer"),
            SessionMessage::tool("c", "t", "ignored tool output"),
        ];
        let summary = rule_based_summary(&messages);
        assert!(summary.starts_with("## 对话摘要"));
        assert!(summary.contains("first question"));
        assert!(summary.contains("second answer"));
        assert!(!summary.contains("ignored tool output"));
    }

    #[test]
    fn rule_based_summary_caps_at_five_user_and_three_assistant_messages() {
        let mut messages = Vec::new();
        for i in 0..8 {
            messages.push(SessionMessage::user(format!("user {i}")));
            messages.push(SessionMessage::assistant(format!("assistant {i}")));
        }
        let summary = rule_based_summary(&messages);
        let user_lines = summary.lines().filter(|l| l.contains("用户:")).count();
        let assistant_lines = summary.lines().filter(|l| l.contains("助手:")).count();
        assert_eq!(user_lines, 5);
        assert_eq!(assistant_lines, 3);
        // the most recent messages are kept, not the earliest.
        assert!(summary.contains("user 7"));
        assert!(summary.contains("assistant 7"));
        assert!(!summary.contains("user 0"));
    }

    #[tokio::test]
    async fn summary_message_carries_compressed_at_header() {
        let store = FakeStore { messages: StdMutex::new(msgs(20)) };
        let compactor = Compactor::new(small_config(), store);
        let provider = MockProvider::default();
        compactor.maybe_compact("s1", &provider).await.unwrap();
        let remaining = compactor.store.messages("s1").await.unwrap();
        assert!(remaining[0].content.starts_with("[对话摘要 — compressed at "));
    }

    #[tokio::test]
    async fn should_compact_uses_hard_ceiling_not_soft_threshold() {
        let store = FakeStore { messages: StdMutex::new(msgs(6)) };
        let compactor = Compactor::new(small_config(), store);
        // 6 short messages sit above the soft threshold of 50 tokens but
        // well under the context_window - reserve hard ceiling of 190.
        assert!(!compactor.should_compact("s1").await.unwrap());
    }
}
