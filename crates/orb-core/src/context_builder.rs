// SPDX-License-Identifier: Apache-2.0
//! Assembles the message list sent to the inference function: a system
//! prompt, optional bootstrap file content, ranked memory context, and a
//! token-budgeted window of recent session history.
use chrono::Utc;

use orb_config::{ContextBuilderConfig, MemoryRankerConfig};
use orb_memory::{rank, Memory, MemoryStream, RankerWeights};
use orb_model::{tokens_for, Message};

use crate::session_store::{MessageRole, SessionMessage};

pub struct ContextBuilder {
    config: ContextBuilderConfig,
    ranker_weights: RankerWeights,
}

fn session_message_to_model_message(m: &SessionMessage) -> Message {
    match m.role {
        MessageRole::System => Message::system(m.content.clone()),
        MessageRole::User => Message::user(m.content.clone()),
        MessageRole::Assistant => Message::assistant(m.content.clone()),
        MessageRole::Tool => Message::tool_result(m.tool_call_id.clone().unwrap_or_default(), m.content.clone()),
    }
}

fn ranker_weights_from_config(config: &MemoryRankerConfig) -> RankerWeights {
    RankerWeights {
        recency: config.recency,
        importance: config.importance,
        relevance: config.relevance,
        frequency: config.frequency,
        context_affinity: config.context_affinity,
    }
}

impl ContextBuilder {
    pub fn new(config: ContextBuilderConfig, ranker_config: MemoryRankerConfig) -> Self {
        Self { config, ranker_weights: ranker_weights_from_config(&ranker_config) }
    }

    fn load_bootstrap(&self) -> Option<String> {
        if !self.config.inject_bootstrap || self.config.bootstrap_files.is_empty() {
            return None;
        }
        let mut combined = String::new();
        for path in &self.config.bootstrap_files {
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    if !combined.is_empty() {
                        combined.push_str("\n\n");
                    }
                    combined.push_str(&content);
                }
                Err(e) => {
                    tracing::warn!(path, error = %e, "failed to read bootstrap file, skipping");
                }
            }
        }
        if combined.is_empty() {
            None
        } else {
            Some(combined)
        }
    }

    fn memory_context(&self, memories: &MemoryStream, query_embedding: Option<&[f32]>) -> Option<String> {
        if !self.config.inject_memory {
            return None;
        }
        let cutoff = Utc::now() - chrono::Duration::days(self.config.recent_memory_days);
        let candidates: Vec<Memory> = memories.get_all().iter().filter(|m| m.last_accessed_at >= cutoff || m.created_at >= cutoff).cloned().collect();
        if candidates.is_empty() {
            return None;
        }
        let recently_activated = memories.recently_activated();
        let ranked = rank(&candidates, query_embedding, &recently_activated, self.ranker_weights, 10);
        if ranked.is_empty() {
            return None;
        }
        let mut text = String::from("Relevant memories:\n");
        for r in &ranked {
            text.push_str(&format!("- {}\n", r.memory.description));
        }
        Some(text)
    }

    /// Builds the message list for one inference call, trimmed to
    /// `max_context_tokens - reserve_tokens`.
    pub fn build(
        &self,
        system_prompt: &str,
        history: &[SessionMessage],
        memories: Option<&MemoryStream>,
        query_embedding: Option<&[f32]>,
    ) -> Vec<Message> {
        let mut messages = Vec::new();
        let mut preamble = system_prompt.to_string();

        if let Some(bootstrap) = self.load_bootstrap() {
            preamble.push_str("\n\n");
            preamble.push_str(&bootstrap);
        }
        if let Some(memories) = memories {
            if let Some(memory_text) = self.memory_context(memories, query_embedding) {
                preamble.push_str("\n\n");
                preamble.push_str(&memory_text);
            }
        }
        messages.push(Message::system(preamble));

        let windowed: Vec<&SessionMessage> = history
            .iter()
            .rev()
            .filter(|m| self.config.include_tool_results || m.role != MessageRole::Tool)
            .take(self.config.max_history_messages)
            .collect();

        let budget = self.config.max_context_tokens.saturating_sub(self.config.reserve_tokens);
        let mut used: u32 = messages.iter().map(|m| m.approx_tokens() as u32).sum();
        let mut kept: Vec<&SessionMessage> = Vec::new();
        for m in windowed {
            let cost = tokens_for(&m.content) as u32;
            if used + cost > budget && !kept.is_empty() {
                break;
            }
            used += cost;
            kept.push(m);
        }
        kept.reverse();

        messages.extend(kept.into_iter().map(session_message_to_model_message));
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orb_memory::MemoryType;

    fn config() -> ContextBuilderConfig {
        ContextBuilderConfig {
            max_history_messages: 10,
            include_tool_results: true,
            max_context_tokens: 1000,
            reserve_tokens: 100,
            inject_bootstrap: false,
            inject_memory: true,
            bootstrap_files: Vec::new(),
            recent_memory_days: 7,
        }
    }

    #[test]
    fn build_always_starts_with_system_message() {
        let builder = ContextBuilder::new(config(), MemoryRankerConfig::default());
        let messages = builder.build("you are a robot", &[], None, None);
        assert!(matches!(messages[0].role, orb_model::Role::System));
    }

    #[test]
    fn build_preserves_chronological_order_of_history() {
        let builder = ContextBuilder::new(config(), MemoryRankerConfig::default());
        let history = vec![SessionMessage::user("first"), SessionMessage::assistant("second"), SessionMessage::user("third")];
        let messages = builder.build("prompt", &history, None, None);
        let contents: Vec<&str> = messages[1..].iter().filter_map(|m| m.as_text()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn build_excludes_tool_messages_when_configured() {
        let mut cfg = config();
        cfg.include_tool_results = false;
        let builder = ContextBuilder::new(cfg, MemoryRankerConfig::default());
        let history = vec![SessionMessage::user("q"), SessionMessage::tool("c1", "shell", "result")];
        let messages = builder.build("prompt", &history, None, None);
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn build_injects_memory_context_when_present() {
        let builder = ContextBuilder::new(config(), MemoryRankerConfig::default());
        let mut stream = MemoryStream::new();
        stream.create(Memory::new("the cup is on the table", MemoryType::Observation, 8.0, vec![]));
        let messages = builder.build("prompt", &[], Some(&stream), None);
        let system_text = messages[0].as_text().unwrap();
        assert!(system_text.contains("the cup is on the table"));
    }

    #[test]
    fn build_respects_token_budget_by_dropping_oldest_first() {
        let mut cfg = config();
        cfg.max_context_tokens = 40;
        cfg.reserve_tokens = 0;
        cfg.max_history_messages = 100;
        let builder = ContextBuilder::new(cfg, MemoryRankerConfig::default());
        let history: Vec<SessionMessage> = (0..20).map(|i| SessionMessage::user(format!("message number {i} with some padding text"))).collect();
        let messages = builder.build("p", &history, None, None);
        assert!(messages.len() < 21);
        let last = messages.last().unwrap().as_text().unwrap();
        assert!(last.contains("message number 19"));
    }
}
