// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model, forwarded verbatim.
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// A single content item in a rich tool output.
#[derive(Debug, Clone)]
pub enum ToolOutputPart {
    Text(String),
    /// Base64 data URL: `data:<mime>;base64,<b64>`.
    Image(String),
}

/// The raw result of running a tool handler, before it is wrapped into a
/// `ToolResult` by the executor.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    /// Plain-text content — concatenation of all `Text` parts. Always set.
    pub content: String,
    pub parts: Vec<ToolOutputPart>,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let text = content.into();
        Self { call_id: call_id.into(), content: text.clone(), parts: vec![ToolOutputPart::Text(text)], is_error: false }
    }

    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        let text = msg.into();
        Self { call_id: call_id.into(), content: text.clone(), parts: vec![ToolOutputPart::Text(text)], is_error: true }
    }

    pub fn with_parts(call_id: impl Into<String>, parts: Vec<ToolOutputPart>) -> Self {
        let text = parts
            .iter()
            .filter_map(|p| match p {
                ToolOutputPart::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        Self { call_id: call_id.into(), content: text, parts, is_error: false }
    }

    pub fn has_images(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, ToolOutputPart::Image(_)))
    }
}

/// Describes the shape of a tool's text output for context-aware truncation
/// by the session compactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCategory {
    /// Terminal/process output: keep head + tail lines (shell tool).
    HeadTail,
    /// Ordered match list: keep the leading matches (memory_search).
    MatchList,
    /// File-like content: keep a head/tail window with a separator.
    FileContent,
    /// Hard-truncate at the character boundary.
    #[default]
    Generic,
}

/// Trait every built-in tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters.
    fn parameters_schema(&self) -> Value;
    /// Group memberships used by profile resolution (e.g. `"memory"`, `"runtime"`).
    fn tags(&self) -> &[&str] {
        &[]
    }
    /// Execution timeout; the executor enforces this under cooperative cancellation.
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
    fn output_category(&self) -> OutputCategory {
        OutputCategory::Generic
    }
    /// Execute the tool. Errors should be wrapped in `ToolOutput::err`.
    async fn execute(&self, call: &ToolCall) -> ToolOutput;
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    struct MinimalTool;

    #[async_trait]
    impl Tool for MinimalTool {
        fn name(&self) -> &str {
            "minimal"
        }
        fn description(&self) -> &str {
            "a minimal tool"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, "ok")
        }
    }

    #[test]
    fn output_category_default_is_generic() {
        assert_eq!(OutputCategory::default(), OutputCategory::Generic);
    }

    #[test]
    fn tool_default_output_category_and_tags_and_timeout() {
        let t = MinimalTool;
        assert_eq!(t.output_category(), OutputCategory::Generic);
        assert!(t.tags().is_empty());
        assert_eq!(t.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn tool_output_ok_is_not_error() {
        let out = ToolOutput::ok("1", "done");
        assert!(!out.is_error);
        assert_eq!(out.content, "done");
    }

    #[test]
    fn tool_output_err_sets_is_error() {
        let out = ToolOutput::err("1", "bad");
        assert!(out.is_error);
    }

    #[test]
    fn tool_output_with_parts_concatenates_text_only() {
        let out = ToolOutput::with_parts(
            "1",
            vec![ToolOutputPart::Text("line1".into()), ToolOutputPart::Image("data:x".into())],
        );
        assert_eq!(out.content, "line1");
        assert!(out.has_images());
    }
}
