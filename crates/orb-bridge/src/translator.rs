// SPDX-License-Identifier: Apache-2.0
//! Command and action types exchanged between the brain and the cerebellum,
//! and the translator registry that turns one into the other.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandPriority {
    Emergency,
    High,
    Normal,
    Low,
    Background,
}

impl Default for CommandPriority {
    fn default() -> Self {
        CommandPriority::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

/// A high-level semantic command issued by the brain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainCommand {
    pub command_id: String,
    pub command_type: String,
    pub parameters: Value,
    pub priority: CommandPriority,
    pub source_agent: String,
    pub timeout_seconds: f64,
    pub created_at: DateTime<Utc>,
    pub metadata: Value,
}

impl BrainCommand {
    pub fn new(command_type: impl Into<String>, parameters: Value, source_agent: impl Into<String>) -> Self {
        Self {
            command_id: Uuid::new_v4().to_string(),
            command_type: command_type.into(),
            parameters,
            priority: CommandPriority::Normal,
            source_agent: source_agent.into(),
            timeout_seconds: 60.0,
            created_at: Utc::now(),
            metadata: Value::Null,
        }
    }

    pub fn with_priority(mut self, priority: CommandPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// One low-level action the cerebellum controller executes, derived from a
/// single `BrainCommand` by a translator. A command may expand into several
/// actions executed in sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CerebellumAction {
    pub action_id: String,
    pub parent_command_id: String,
    pub action_type: String,
    pub ros2_topic: String,
    pub ros2_payload: Value,
    pub sequence_index: u32,
    pub timeout_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl CerebellumAction {
    pub fn new(parent_command_id: &str, action_type: impl Into<String>, ros2_topic: impl Into<String>, ros2_payload: Value, sequence_index: u32) -> Self {
        Self {
            action_id: Uuid::new_v4().to_string(),
            parent_command_id: parent_command_id.to_string(),
            action_type: action_type.into(),
            ros2_topic: ros2_topic.into(),
            ros2_payload,
            sequence_index,
            timeout_ms: 5000,
            created_at: Utc::now(),
        }
    }
}

/// Feedback reported for one action, fed back up into a command's aggregate
/// status by the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CerebellumFeedback {
    pub feedback_id: String,
    pub action_id: String,
    pub command_id: String,
    pub status: ExecutionStatus,
    pub progress: f32,
    pub sensor_data: Value,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CerebellumFeedback {
    pub fn success(command_id: &str, action_id: &str) -> Self {
        Self {
            feedback_id: Uuid::new_v4().to_string(),
            action_id: action_id.to_string(),
            command_id: command_id.to_string(),
            status: ExecutionStatus::Completed,
            progress: 1.0,
            sensor_data: Value::Null,
            error_code: None,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(command_id: &str, action_id: &str, error_code: &str, message: impl Into<String>) -> Self {
        Self {
            feedback_id: Uuid::new_v4().to_string(),
            action_id: action_id.to_string(),
            command_id: command_id.to_string(),
            status: ExecutionStatus::Failed,
            progress: 0.0,
            sensor_data: Value::Null,
            error_code: Some(error_code.to_string()),
            error_message: Some(message.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Translates a `BrainCommand` into the ordered sequence of actions the
/// cerebellum transport expects. Translators are tried in registration order
/// and the first whose `can_translate` returns true wins.
pub trait CommandTranslator: Send + Sync {
    fn name(&self) -> &str;
    fn can_translate(&self, command: &BrainCommand) -> bool;
    fn translate(&self, command: &BrainCommand) -> Vec<CerebellumAction>;
}

/// Translates `move | move_to | navigate` into a single navigation action.
pub struct MoveCommandTranslator;

impl CommandTranslator for MoveCommandTranslator {
    fn name(&self) -> &str {
        "mover"
    }

    fn can_translate(&self, command: &BrainCommand) -> bool {
        matches!(command.command_type.as_str(), "move" | "move_to" | "navigate" | "forward" | "backward" | "turn_left" | "turn_right" | "stop")
    }

    fn translate(&self, command: &BrainCommand) -> Vec<CerebellumAction> {
        vec![CerebellumAction::new(&command.command_id, "navigate", "/cmd_vel", command.parameters.clone(), 0)]
    }
}

/// Translates `grasp | pick | grab` into a four-step approach/open/grasp/close
/// sequence.
pub struct GraspCommandTranslator;

impl CommandTranslator for GraspCommandTranslator {
    fn name(&self) -> &str {
        "grasper"
    }

    fn can_translate(&self, command: &BrainCommand) -> bool {
        matches!(command.command_type.as_str(), "grasp" | "pick" | "grab")
    }

    fn translate(&self, command: &BrainCommand) -> Vec<CerebellumAction> {
        let id = &command.command_id;
        let params = &command.parameters;
        vec![
            CerebellumAction::new(id, "approach", "/gripper/approach", params.clone(), 0),
            CerebellumAction::new(id, "open", "/gripper/open", Value::Null, 1),
            CerebellumAction::new(id, "grasp_pose", "/gripper/pose", params.clone(), 2),
            CerebellumAction::new(id, "close", "/gripper/close", Value::Null, 3),
        ]
    }
}

/// Ordered list of translators, first match wins.
pub struct TranslatorRegistry {
    translators: Vec<Box<dyn CommandTranslator>>,
}

impl TranslatorRegistry {
    pub fn new() -> Self {
        Self { translators: Vec::new() }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(MoveCommandTranslator));
        registry.register(Box::new(GraspCommandTranslator));
        registry
    }

    pub fn register(&mut self, translator: Box<dyn CommandTranslator>) {
        self.translators.push(translator);
    }

    pub fn resolve(&self, command: &BrainCommand) -> Option<&dyn CommandTranslator> {
        self.translators.iter().map(|t| t.as_ref()).find(|t| t.can_translate(command))
    }
}

impl Default for TranslatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mover_handles_navigation_verbs() {
        let t = MoveCommandTranslator;
        let cmd = BrainCommand::new("move_to", Value::Null, "agent-1");
        assert!(t.can_translate(&cmd));
        let actions = t.translate(&cmd);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].ros2_topic, "/cmd_vel");
    }

    #[test]
    fn grasper_produces_four_step_sequence() {
        let t = GraspCommandTranslator;
        let cmd = BrainCommand::new("grasp", serde_json::json!({"x": 1}), "agent-1");
        let actions = t.translate(&cmd);
        assert_eq!(actions.len(), 4);
        assert_eq!(actions.iter().map(|a| a.sequence_index).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(actions[0].action_type, "approach");
        assert_eq!(actions[3].action_type, "close");
    }

    #[test]
    fn registry_resolves_first_matching_translator() {
        let registry = TranslatorRegistry::with_builtins();
        let cmd = BrainCommand::new("pour", Value::Null, "agent-1");
        assert!(registry.resolve(&cmd).is_none());

        let cmd = BrainCommand::new("grab", Value::Null, "agent-1");
        let t = registry.resolve(&cmd).unwrap();
        assert_eq!(t.name(), "grasper");
    }
}
