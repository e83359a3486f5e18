// SPDX-License-Identifier: Apache-2.0
//! The fallback behavior: always applicable at a small non-zero confidence,
//! it drives the agent loop through inference and parses the reply as a
//! chat response plus a list of proposed commands. Without an agent loop
//! configured it falls back further to rule-based keyword matching.
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use orb_core::{AgentLoop, QueueMode};

use crate::behavior::{Behavior, BehaviorContext, BehaviorOutput, ProposedCommand};

pub struct FallbackBehavior {
    agent_loop: Option<Arc<AgentLoop>>,
    fallback_confidence: f32,
}

impl FallbackBehavior {
    pub fn new(agent_loop: Option<Arc<AgentLoop>>, fallback_confidence: f32) -> Self {
        Self { agent_loop, fallback_confidence }
    }

    /// Whether this invocation will go through the LLM (`true`) or the
    /// rule-based path (`false`). Exposed so the top-level orchestrator can
    /// report `mode` without re-deriving it.
    pub fn uses_llm(&self) -> bool {
        self.agent_loop.is_some()
    }
}

#[async_trait]
impl Behavior for FallbackBehavior {
    fn name(&self) -> &str {
        "fallback"
    }

    fn description(&self) -> &str {
        "Always-applicable fallback: drives the LLM, or rule-based keyword matching with no LLM configured"
    }

    fn mode_hint(&self) -> &'static str {
        if self.uses_llm() {
            "llm"
        } else {
            "rule"
        }
    }

    async fn can_handle(&self, _utterance: &str) -> f32 {
        self.fallback_confidence
    }

    async fn execute(&self, ctx: &BehaviorContext<'_>) -> anyhow::Result<BehaviorOutput> {
        match &self.agent_loop {
            Some(agent_loop) => {
                let run = agent_loop.run(ctx.session_id, ctx.agent_id, ctx.user_input, None, QueueMode::Collect, ctx.memories).await?;
                Ok(parse_llm_reply(&run.response))
            }
            None => Ok(rule_based_reply(ctx.user_input)),
        }
    }
}

/// Parses an assistant reply expecting `{chat_response, ros2_commands}`,
/// falling back to a fenced ```json``` block, then to treating the whole
/// reply as plain chat text with no commands.
fn parse_llm_reply(raw: &str) -> BehaviorOutput {
    if let Some(output) = try_parse_json_object(raw.trim()) {
        return output;
    }
    if let Some(block) = extract_fenced_json(raw) {
        if let Some(output) = try_parse_json_object(block.trim()) {
            return output;
        }
    }
    BehaviorOutput { chat_response: raw.to_string(), commands: Vec::new(), steps: Vec::new() }
}

fn try_parse_json_object(text: &str) -> Option<BehaviorOutput> {
    let value: Value = serde_json::from_str(text).ok()?;
    let obj = value.as_object()?;
    let chat_response = obj.get("chat_response")?.as_str()?.to_string();
    let commands = obj
        .get("ros2_commands")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|c| {
                    let command_type = c.get("command_type")?.as_str()?.to_string();
                    let parameters = c.get("parameters").cloned().unwrap_or(Value::Null);
                    Some(ProposedCommand::new(command_type, parameters))
                })
                .collect()
        })
        .unwrap_or_default();
    Some(BehaviorOutput { chat_response, commands, steps: Vec::new() })
}

fn extract_fenced_json(text: &str) -> Option<String> {
    let re = Regex::new(r"```(?:json)?\s*([\s\S]*?)```").ok()?;
    re.captures(text).map(|caps| caps[1].to_string())
}

const GREETINGS: &[&str] = &["hello", "hi", "hey", "good morning", "good afternoon", "你好", "您好", "早上好", "嗨"];
const FAREWELLS: &[&str] = &["bye", "goodbye", "see you", "farewell", "再见", "拜拜"];

/// Simple keyword matching used when no model provider is configured:
/// greetings and farewells get a canned reply, a handful of imperative verbs
/// (English and Chinese) map directly onto the command vocabulary, anything
/// else gets an acknowledgement with no commands.
fn rule_based_reply(utterance: &str) -> BehaviorOutput {
    let lower = utterance.to_lowercase();

    if GREETINGS.iter().any(|g| lower.contains(g)) {
        return BehaviorOutput::text_only("Hello! How can I help?");
    }
    if FAREWELLS.iter().any(|f| lower.contains(f)) {
        return BehaviorOutput::text_only("Goodbye!");
    }

    // Navigation phrasings carry a target (e.g. "去厨房" → kitchen) as a parameter
    // rather than a bare command type.
    const NAVIGATE_PREFIXES: &[&str] = &["去", "到", "前往", "go to ", "navigate to "];
    for prefix in NAVIGATE_PREFIXES {
        if let Some(target) = lower.find(prefix).map(|i| utterance[i + prefix.len()..].trim()).filter(|t| !t.is_empty()) {
            return BehaviorOutput {
                chat_response: format!("Navigating to {target}"),
                commands: vec![ProposedCommand::new("navigate", json!({ "target": target }))],
                steps: Vec::new(),
            };
        }
    }

    let verb_map: &[(&str, &str)] = &[
        ("move forward", "forward"),
        ("go forward", "forward"),
        ("move back", "backward"),
        ("go back", "backward"),
        ("turn left", "turn_left"),
        ("turn right", "turn_right"),
        ("stop", "stop"),
        ("grasp", "grasp"),
        ("pick up", "grasp"),
        ("place", "place"),
        ("pour", "pour"),
        ("patrol", "patrol"),
        ("clean", "clean"),
        ("前进", "forward"),
        ("后退", "backward"),
        ("左转", "turn_left"),
        ("右转", "turn_right"),
        ("停止", "stop"),
        ("停下", "stop"),
        ("抓取", "grasp"),
        ("拿起", "grasp"),
        ("放下", "place"),
        ("倒水", "pour"),
        ("巡逻", "patrol"),
        ("打扫", "clean"),
        ("清洁", "clean"),
    ];

    for (phrase, command_type) in verb_map {
        if lower.contains(phrase) {
            return BehaviorOutput {
                chat_response: format!("Executing: {command_type}"),
                commands: vec![ProposedCommand::new(*command_type, Value::Null)],
                steps: Vec::new(),
            };
        }
    }

    BehaviorOutput::text_only("Understood.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_json_reply() {
        let raw = r#"{"chat_response": "moving now", "ros2_commands": [{"command_type": "forward", "parameters": {"duration": 2}}]}"#;
        let output = parse_llm_reply(raw);
        assert_eq!(output.chat_response, "moving now");
        assert_eq!(output.commands.len(), 1);
        assert_eq!(output.commands[0].command_type, "forward");
    }

    #[test]
    fn parses_fenced_json_block() {
        let raw = "Sure thing.\n```json\n{\"chat_response\": \"ok\", \"ros2_commands\": []}\n```\n";
        let output = parse_llm_reply(raw);
        assert_eq!(output.chat_response, "ok");
        assert!(output.commands.is_empty());
    }

    #[test]
    fn falls_back_to_raw_text_when_unparseable() {
        let raw = "just a normal sentence, not json at all";
        let output = parse_llm_reply(raw);
        assert_eq!(output.chat_response, raw);
        assert!(output.commands.is_empty());
    }

    #[test]
    fn rule_based_reply_recognises_greeting() {
        let output = rule_based_reply("hey there");
        assert!(output.chat_response.to_lowercase().contains("hello"));
        assert!(output.commands.is_empty());
    }

    #[test]
    fn rule_based_reply_maps_imperative_verb_to_command() {
        let output = rule_based_reply("please turn left now");
        assert_eq!(output.commands.len(), 1);
        assert_eq!(output.commands[0].command_type, "turn_left");
    }

    #[test]
    fn rule_based_reply_defaults_to_acknowledgement() {
        let output = rule_based_reply("what is the weather");
        assert_eq!(output.chat_response, "Understood.");
        assert!(output.commands.is_empty());
    }

    #[test]
    fn rule_based_reply_recognises_chinese_greeting() {
        let output = rule_based_reply("你好");
        assert!(output.chat_response.to_lowercase().contains("hello"));
        assert!(output.commands.is_empty());
    }

    #[test]
    fn rule_based_reply_maps_chinese_navigation_to_navigate_command() {
        let output = rule_based_reply("去厨房");
        assert_eq!(output.commands.len(), 1);
        assert_eq!(output.commands[0].command_type, "navigate");
        assert_eq!(output.commands[0].parameters["target"], "厨房");
    }
}
