// SPDX-License-Identifier: Apache-2.0
//! The `Behavior` trait and a matcher that picks the best-confidence
//! registered behavior for a given utterance, falling back when none clears
//! the configured threshold.
use async_trait::async_trait;
use orb_memory::MemoryStream;
use serde_json::Value;

/// One command the behavior wants dispatched to the bridge/broadcaster.
#[derive(Debug, Clone)]
pub struct ProposedCommand {
    pub command_type: String,
    pub parameters: Value,
}

impl ProposedCommand {
    pub fn new(command_type: impl Into<String>, parameters: Value) -> Self {
        Self { command_type: command_type.into(), parameters }
    }
}

/// What a behavior produced for one utterance.
#[derive(Debug, Clone)]
pub struct BehaviorOutput {
    pub chat_response: String,
    pub commands: Vec<ProposedCommand>,
    pub steps: Vec<String>,
}

impl BehaviorOutput {
    pub fn text_only(chat_response: impl Into<String>) -> Self {
        Self { chat_response: chat_response.into(), commands: Vec::new(), steps: Vec::new() }
    }
}

/// Everything a behavior needs to decide how to respond.
pub struct BehaviorContext<'a> {
    pub session_id: &'a str,
    pub agent_id: &'a str,
    pub user_input: &'a str,
    pub memories: Option<&'a MemoryStream>,
}

/// A strategy for responding to an utterance: score how well it applies,
/// then (if selected) produce a reply and a list of commands.
#[async_trait]
pub trait Behavior: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn required_capabilities(&self) -> &[&str] {
        &[]
    }

    fn tags(&self) -> &[&str] {
        &[]
    }

    /// Whether executing this behavior goes through the LLM (`"llm"`) or a
    /// purely rule-based path (`"rule"`). Most behaviors are one or the
    /// other unconditionally; the fallback behavior decides per-instance
    /// based on whether it was given a model-backed agent loop.
    fn mode_hint(&self) -> &'static str {
        "llm"
    }

    async fn can_handle(&self, utterance: &str) -> f32;

    async fn execute(&self, ctx: &BehaviorContext<'_>) -> anyhow::Result<BehaviorOutput>;
}

/// Iterates registered behaviors, scoring each with `can_handle`, and picks
/// the best-confidence one that clears `threshold`. The fallback behavior is
/// never scored against the threshold — it is used whenever nothing else
/// qualifies.
pub struct BehaviorMatcher {
    behaviors: Vec<std::sync::Arc<dyn Behavior>>,
    threshold: f32,
    fallback: std::sync::Arc<dyn Behavior>,
}

impl BehaviorMatcher {
    pub fn new(threshold: f32, fallback: std::sync::Arc<dyn Behavior>) -> Self {
        Self { behaviors: Vec::new(), threshold, fallback }
    }

    pub fn register(&mut self, behavior: std::sync::Arc<dyn Behavior>) {
        self.behaviors.push(behavior);
    }

    /// Returns the selected behavior and the confidence it reported.
    pub async fn select(&self, utterance: &str) -> (std::sync::Arc<dyn Behavior>, f32) {
        let mut best: Option<(std::sync::Arc<dyn Behavior>, f32)> = None;
        for behavior in &self.behaviors {
            let confidence = behavior.can_handle(utterance).await;
            if best.as_ref().map(|(_, c)| confidence > *c).unwrap_or(true) {
                best = Some((behavior.clone(), confidence));
            }
        }
        match best {
            Some((behavior, confidence)) if confidence >= self.threshold => (behavior, confidence),
            _ => {
                let confidence = self.fallback.can_handle(utterance).await;
                (self.fallback.clone(), confidence)
            }
        }
    }
}
