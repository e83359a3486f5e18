// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::Value;

/// What is being assessed for risk: either a tool call about to dispatch, or
/// a brain command about to be sent to the cerebellum bridge. Kept in terms
/// of plain strings/JSON so both `orb-tools` and `orb-bridge` can depend on
/// this trait without depending on each other.
#[derive(Debug, Clone)]
pub enum RiskSubject {
    ToolCall { name: String, args: Value },
    Command { command_type: String, parameters: Value },
}

#[derive(Debug, Clone)]
pub struct RiskVerdict {
    pub allowed: bool,
    pub reason: Option<String>,
    /// Suggested `memory_type` for recording this assessment (e.g. `"safety"`
    /// when the subject was denied), left for the caller to act on.
    pub memory_type_hint: Option<String>,
}

impl RiskVerdict {
    pub fn allow() -> Self {
        Self { allowed: true, reason: None, memory_type_hint: None }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self { allowed: false, reason: Some(reason.into()), memory_type_hint: Some("safety".into()) }
    }
}

/// Assesses tool calls and bridge commands before they execute. Sits between
/// the policy check and registry resolution in the tool executor, and before
/// dispatch in the bridge's `send_command`.
#[async_trait]
pub trait RiskMonitor: Send + Sync {
    async fn assess(&self, subject: RiskSubject) -> RiskVerdict;
}

/// Default monitor: allows everything. A real deployment supplies a monitor
/// that inspects command parameters (e.g. reject `duration` beyond a safety
/// ceiling, reject speeds above a configured multiplier).
#[derive(Default)]
pub struct NoopRiskMonitor;

#[async_trait]
impl RiskMonitor for NoopRiskMonitor {
    async fn assess(&self, _subject: RiskSubject) -> RiskVerdict {
        RiskVerdict::allow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_monitor_allows_tool_calls() {
        let m = NoopRiskMonitor;
        let v = m.assess(RiskSubject::ToolCall { name: "shell".into(), args: serde_json::json!({}) }).await;
        assert!(v.allowed);
    }

    #[tokio::test]
    async fn noop_monitor_allows_commands() {
        let m = NoopRiskMonitor;
        let v = m
            .assess(RiskSubject::Command { command_type: "forward".into(), parameters: serde_json::json!({}) })
            .await;
        assert!(v.allowed);
    }

    #[test]
    fn deny_sets_safety_memory_hint() {
        let v = RiskVerdict::deny("too fast");
        assert!(!v.allowed);
        assert_eq!(v.memory_type_hint.as_deref(), Some("safety"));
    }
}
