// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// A single message in the conversation passed to the inference function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, content: MessageContent::Text(text.into()) }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: MessageContent::Text(text.into()) }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: MessageContent::Text(text.into()) }
    }

    pub fn tool_result(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::ToolResult {
                tool_call_id: id.into(),
                content: content.into(),
            },
        }
    }

    /// Plain text of this message, if it carries exactly a text body.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Approximate token count for context budgeting.
    ///
    /// CJK-ratio-aware: characters in the CJK unified ranges cost ~1.5
    /// chars/token, everything else ~4.0 chars/token. A message that is a
    /// mix of both is weighted by the proportion of CJK characters.
    pub fn approx_tokens(&self) -> usize {
        let text = match &self.content {
            MessageContent::Text(t) => t.as_str(),
            MessageContent::ToolCall { function, .. } => return tokens_for(&function.name) + tokens_for(&function.arguments),
            MessageContent::ToolResult { content, .. } => content.as_str(),
        };
        tokens_for(text)
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0x3040..=0x30FF | 0xAC00..=0xD7A3
    )
}

/// Token estimator shared with the compactor's context accounting.
///
/// Splits the input by CJK/non-CJK character ratio and applies the
/// corresponding chars-per-token divisor to each portion.
pub fn tokens_for(text: &str) -> usize {
    if text.is_empty() {
        return 1;
    }
    let total = text.chars().count();
    let cjk = text.chars().filter(|c| is_cjk(*c)).count();
    let non_cjk = total - cjk;
    let est = (cjk as f32 / 1.5) + (non_cjk as f32 / 4.0);
    (est.round() as usize).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// The content of a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    ToolCall {
        tool_call_id: String,
        function: FunctionCall,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
    },
}

impl MessageContent {
    fn as_str(&self) -> &str {
        match self {
            MessageContent::Text(t) => t,
            MessageContent::ToolResult { content, .. } => content,
            MessageContent::ToolCall { .. } => "",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object.
    pub arguments: String,
}

/// A tool schema handed to the model alongside the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Request sent to the inference function for one turn.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub stream: bool,
}

/// A single streamed event produced by the inference function.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    /// A text delta of the assistant's reply.
    TextDelta(String),
    /// The model wants to call a tool. `index` disambiguates parallel tool
    /// calls accumulating within the same turn.
    ToolCall {
        index: u32,
        id: String,
        name: String,
        /// Accumulated JSON arguments (may arrive across multiple deltas).
        arguments: String,
    },
    /// Final token usage for this completion.
    Usage {
        input_tokens: u32,
        output_tokens: u32,
    },
    /// The stream finished normally.
    Done,
    /// A recoverable error (non-fatal warning); the stream may continue.
    Error(String),
}

/// Token usage accumulated from one turn, carried into session accounting.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_user_sets_role_and_text() {
        let m = Message::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.as_text(), Some("hello"));
    }

    #[test]
    fn message_tool_result_round_trip() {
        let m = Message::tool_result("id-1", "output");
        assert_eq!(m.role, Role::Tool);
        match &m.content {
            MessageContent::ToolResult { tool_call_id, content } => {
                assert_eq!(tool_call_id, "id-1");
                assert_eq!(content, "output");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn approx_tokens_ascii_uses_four_chars_per_token() {
        let m = Message::user("12345678");
        assert_eq!(m.approx_tokens(), 2);
    }

    #[test]
    fn approx_tokens_empty_text_is_one() {
        let m = Message::user("");
        assert_eq!(m.approx_tokens(), 1);
    }

    #[test]
    fn approx_tokens_cjk_uses_one_point_five_chars_per_token() {
        // 6 CJK characters / 1.5 = 4 tokens.
        let m = Message::user("我记得杯子在厨");
        assert_eq!(m.approx_tokens(), 4);
    }

    #[test]
    fn approx_tokens_mixed_cjk_and_ascii_weighted_by_ratio() {
        // 3 CJK (/1.5 = 2.0) + 4 ascii (/4.0 = 1.0) = 3 tokens.
        let m = Message::user("我记得cup!");
        assert_eq!(m.approx_tokens(), 3);
    }

    #[test]
    fn tool_schema_serialises_correctly() {
        let ts = ToolSchema {
            name: "memory_search".into(),
            description: "search memories".into(),
            parameters: serde_json::json!({ "type": "object" }),
        };
        let json = serde_json::to_string(&ts).unwrap();
        assert!(json.contains("memory_search"));
    }
}
