// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use crate::policy::{Decision, ToolPolicy};
use crate::risk::{NoopRiskMonitor, RiskMonitor, RiskSubject};
use crate::{ToolCall, ToolRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Success,
    Error,
    Timeout,
    Denied,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub status: ToolStatus,
    /// Present on `Success`/`Error`: the tool's text output.
    pub content: Option<String>,
    /// Present on `Denied`/`Error`/`Timeout`: a human-readable reason.
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ToolResult {
    fn denied(call: &ToolCall, reason: impl Into<String>) -> Self {
        Self { call_id: call.id.clone(), tool_name: call.name.clone(), status: ToolStatus::Denied, content: None, error: Some(reason.into()), duration_ms: 0 }
    }

    fn skipped(call: &ToolCall) -> Self {
        Self { call_id: call.id.clone(), tool_name: call.name.clone(), status: ToolStatus::Skipped, content: None, error: None, duration_ms: 0 }
    }
}

/// Execution context threaded through policy/risk checks.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub agent_id: Option<String>,
}

/// Runs tool calls: policy check, risk-monitor check, registry resolution,
/// cooperative-cancellation timeout, result capture — in that order. A
/// policy denial or risk-monitor denial is terminal for that call; neither
/// aborts the surrounding agent loop.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    policy: ToolPolicy,
    risk_monitor: Arc<dyn RiskMonitor>,
    enforce_policy: bool,
    denied_count: std::sync::atomic::AtomicU64,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, policy: ToolPolicy) -> Self {
        Self { registry, policy, risk_monitor: Arc::new(NoopRiskMonitor), enforce_policy: true, denied_count: std::sync::atomic::AtomicU64::new(0) }
    }

    pub fn with_risk_monitor(mut self, monitor: Arc<dyn RiskMonitor>) -> Self {
        self.risk_monitor = monitor;
        self
    }

    pub fn with_enforce_policy(mut self, enforce: bool) -> Self {
        self.enforce_policy = enforce;
        self
    }

    pub fn denied_count(&self) -> u64 {
        self.denied_count.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub async fn execute(&self, call: &ToolCall, ctx: &ExecutionContext) -> ToolResult {
        if self.enforce_policy {
            let decision = self.policy.check(&call.name, ctx.agent_id.as_deref());
            if decision == Decision::Deny {
                self.denied_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return ToolResult::denied(call, format!("tool '{}' denied by policy", call.name));
            }
        }

        let verdict = self
            .risk_monitor
            .assess(RiskSubject::ToolCall { name: call.name.clone(), args: call.args.clone() })
            .await;
        if !verdict.allowed {
            self.denied_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return ToolResult::denied(call, verdict.reason.unwrap_or_else(|| "denied by risk monitor".into()));
        }

        let Some(tool) = self.registry.get(&call.name) else {
            return ToolResult {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                status: ToolStatus::Error,
                content: None,
                error: Some(format!("unknown tool: {}", call.name)),
                duration_ms: 0,
            };
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(tool.timeout(), tool.execute(call)).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) if !output.is_error => {
                ToolResult { call_id: call.id.clone(), tool_name: call.name.clone(), status: ToolStatus::Success, content: Some(output.content), error: None, duration_ms }
            }
            Ok(output) => {
                ToolResult { call_id: call.id.clone(), tool_name: call.name.clone(), status: ToolStatus::Error, content: None, error: Some(output.content), duration_ms }
            }
            Err(_) => {
                warn!(tool = %call.name, timeout_secs = tool.timeout().as_secs(), "tool call timed out");
                ToolResult { call_id: call.id.clone(), tool_name: call.name.clone(), status: ToolStatus::Timeout, content: None, error: Some(format!("timeout after {}s", tool.timeout().as_secs())), duration_ms }
            }
        }
    }

    /// Run `calls` concurrently when `parallel`, else sequentially. Result
    /// order always matches input order.
    pub async fn execute_batch(&self, calls: &[ToolCall], ctx: &ExecutionContext, parallel: bool) -> Vec<ToolResult> {
        if parallel {
            let futs = calls.iter().map(|c| self.execute(c, ctx));
            futures::future::join_all(futs).await
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.execute(call, ctx).await);
            }
            results
        }
    }

    /// Produce a synthetic `Skipped` result without dispatching the call.
    pub fn skip_tool_call(&self, call: &ToolCall) -> ToolResult {
        ToolResult::skipped(call)
    }

    /// Produce a synthetic `Denied` result without dispatching the call.
    pub fn deny_tool_call(&self, call: &ToolCall, reason: impl Into<String>) -> ToolResult {
        ToolResult::denied(call, reason)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::risk::RiskVerdict;
    use crate::tool::{Tool, ToolOutput};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echo"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, "ok")
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "slow"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn timeout(&self) -> Duration {
            Duration::from_millis(20)
        }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            tokio::time::sleep(Duration::from_secs(5)).await;
            ToolOutput::ok(&call.id, "too slow")
        }
    }

    struct AlwaysDenyMonitor;

    #[async_trait]
    impl RiskMonitor for AlwaysDenyMonitor {
        async fn assess(&self, _subject: RiskSubject) -> RiskVerdict {
            RiskVerdict::deny("unsafe")
        }
    }

    fn registry_with(tool: impl Tool + 'static) -> Arc<ToolRegistry> {
        let mut reg = ToolRegistry::new();
        reg.register(tool);
        Arc::new(reg)
    }

    #[tokio::test]
    async fn successful_execution_returns_success_status() {
        let executor = ToolExecutor::new(registry_with(EchoTool), ToolPolicy::default());
        let call = ToolCall { id: "1".into(), name: "echo".into(), args: json!({}) };
        let result = executor.execute(&call, &ExecutionContext::default()).await;
        assert_eq!(result.status, ToolStatus::Success);
        assert_eq!(result.content.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn unknown_tool_returns_error_status() {
        let executor = ToolExecutor::new(Arc::new(ToolRegistry::new()), ToolPolicy::default());
        let call = ToolCall { id: "1".into(), name: "missing".into(), args: json!({}) };
        let result = executor.execute(&call, &ExecutionContext::default()).await;
        assert_eq!(result.status, ToolStatus::Error);
    }

    #[tokio::test]
    async fn policy_denial_is_terminal_and_increments_counter() {
        let policy = ToolPolicy::new(vec![], vec!["echo".into()], None);
        let executor = ToolExecutor::new(registry_with(EchoTool), policy);
        let call = ToolCall { id: "1".into(), name: "echo".into(), args: json!({}) };
        let result = executor.execute(&call, &ExecutionContext::default()).await;
        assert_eq!(result.status, ToolStatus::Denied);
        assert_eq!(executor.denied_count(), 1);
    }

    #[tokio::test]
    async fn risk_monitor_denial_is_terminal() {
        let executor = ToolExecutor::new(registry_with(EchoTool), ToolPolicy::default()).with_risk_monitor(Arc::new(AlwaysDenyMonitor));
        let call = ToolCall { id: "1".into(), name: "echo".into(), args: json!({}) };
        let result = executor.execute(&call, &ExecutionContext::default()).await;
        assert_eq!(result.status, ToolStatus::Denied);
        assert_eq!(result.error.as_deref(), Some("unsafe"));
    }

    #[tokio::test]
    async fn timeout_returns_timeout_status() {
        let executor = ToolExecutor::new(registry_with(SlowTool), ToolPolicy::default());
        let call = ToolCall { id: "1".into(), name: "slow".into(), args: json!({}) };
        let result = executor.execute(&call, &ExecutionContext::default()).await;
        assert_eq!(result.status, ToolStatus::Timeout);
    }

    #[tokio::test]
    async fn execute_batch_preserves_input_order() {
        let executor = ToolExecutor::new(registry_with(EchoTool), ToolPolicy::default());
        let calls: Vec<ToolCall> = (0..5).map(|i| ToolCall { id: i.to_string(), name: "echo".into(), args: json!({}) }).collect();
        let results = executor.execute_batch(&calls, &ExecutionContext::default(), true).await;
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.call_id, i.to_string());
        }
    }

    #[test]
    fn skip_tool_call_produces_synthetic_skipped_result() {
        let executor = ToolExecutor::new(Arc::new(ToolRegistry::new()), ToolPolicy::default());
        let call = ToolCall { id: "1".into(), name: "echo".into(), args: json!({}) };
        let result = executor.skip_tool_call(&call);
        assert_eq!(result.status, ToolStatus::Skipped);
    }

    #[test]
    fn deny_tool_call_produces_synthetic_denied_result() {
        let executor = ToolExecutor::new(Arc::new(ToolRegistry::new()), ToolPolicy::default());
        let call = ToolCall { id: "1".into(), name: "echo".into(), args: json!({}) };
        let result = executor.deny_tool_call(&call, "manually denied");
        assert_eq!(result.status, ToolStatus::Denied);
        assert_eq!(result.error.as_deref(), Some("manually denied"));
    }
}
