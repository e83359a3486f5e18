// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Root configuration tree. Only the fields named below are consumed by the
/// core; any other key present in a loaded YAML document is preserved by
/// `serde_yaml::Value` round-tripping elsewhere but is simply absent here —
/// unknown keys are never an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub brain_pipeline: BrainPipelineConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub session_store: SessionStoreConfig,
    #[serde(default)]
    pub compactor: CompactorConfig,
    #[serde(default)]
    pub context_builder: ContextBuilderConfig,
    #[serde(default)]
    pub memory_ranker: MemoryRankerConfig,
    #[serde(default)]
    pub tool_policy: ToolPolicyConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub behavior: BehaviorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "mock".into(),
            model: "mock-model".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataConfig {
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainPipelineConfig {
    pub message_bus_type: String,
    pub max_queue_size: u32,
    /// Milliseconds.
    pub message_timeout: u64,
}

impl Default for BrainPipelineConfig {
    fn default() -> Self {
        Self {
            message_bus_type: "inmemory".into(),
            max_queue_size: 1000,
            message_timeout: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub max_concurrent_agents: u32,
    /// Seconds.
    pub agent_timeout: u64,
    /// Seconds.
    pub health_check_interval: u64,
    /// Maximum INTAKE..TOOL_EXECUTION iterations per run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Maximum tool calls dispatched in a single turn.
    #[serde(default = "default_max_tool_calls_per_turn")]
    pub max_tool_calls_per_turn: u32,
    /// Hard deadline for one run, seconds.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_seconds: u64,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_max_tool_calls_per_turn() -> u32 {
    16
}
fn default_run_timeout() -> u64 {
    120
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: 4,
            agent_timeout: 30,
            health_check_interval: 10,
            max_iterations: default_max_iterations(),
            max_tool_calls_per_turn: default_max_tool_calls_per_turn(),
            run_timeout_seconds: default_run_timeout(),
        }
    }
}

/// Session reset policy, see session_store::ResetPolicy for the evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResetPolicyConfig {
    Daily { at_hour: u32 },
    Idle { idle_minutes: i64 },
    Manual { triggers: Vec<String> },
    Never,
}

impl Default for ResetPolicyConfig {
    fn default() -> Self {
        ResetPolicyConfig::Manual {
            triggers: vec!["/new".into(), "/reset".into()],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStoreConfig {
    #[serde(default)]
    pub reset_policy: ResetPolicyConfig,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
    pub max_sessions: Option<usize>,
}

fn default_max_age_days() -> i64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactorConfig {
    pub context_window: u32,
    pub reserve_tokens_floor: u32,
    pub soft_threshold_tokens: u32,
    #[serde(default = "default_true")]
    pub prune_old_tool_results: bool,
    pub tool_result_max_age_turns: u32,
    pub tool_result_max_chars: usize,
    pub compaction_ratio: f32,
    pub summary_max_tokens: u32,
    pub chars_per_token: f32,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            context_window: 128_000,
            reserve_tokens_floor: 4_000,
            soft_threshold_tokens: 8_000,
            prune_old_tool_results: true,
            tool_result_max_age_turns: 4,
            tool_result_max_chars: 2_000,
            compaction_ratio: 0.5,
            summary_max_tokens: 1_000,
            chars_per_token: 4.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBuilderConfig {
    pub max_history_messages: usize,
    #[serde(default = "default_true")]
    pub include_tool_results: bool,
    pub max_context_tokens: u32,
    pub reserve_tokens: u32,
    #[serde(default)]
    pub inject_bootstrap: bool,
    #[serde(default = "default_true")]
    pub inject_memory: bool,
    #[serde(default)]
    pub bootstrap_files: Vec<String>,
    #[serde(default = "default_memory_days")]
    pub recent_memory_days: i64,
}

fn default_memory_days() -> i64 {
    7
}

impl Default for ContextBuilderConfig {
    fn default() -> Self {
        Self {
            max_history_messages: 40,
            include_tool_results: true,
            max_context_tokens: 32_000,
            reserve_tokens: 2_000,
            inject_bootstrap: false,
            inject_memory: true,
            bootstrap_files: Vec::new(),
            recent_memory_days: default_memory_days(),
        }
    }
}

/// Per-signal weights for the memory ranker's linear fusion, see
/// `orb_memory::ranker`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRankerConfig {
    pub recency: f32,
    pub importance: f32,
    pub relevance: f32,
    pub frequency: f32,
    pub context_affinity: f32,
}

impl Default for MemoryRankerConfig {
    fn default() -> Self {
        Self {
            recency: 1.0,
            importance: 1.5,
            relevance: 2.0,
            frequency: 0.3,
            context_affinity: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPolicyConfig {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
    pub profile: Option<String>,
    #[serde(default)]
    pub shell: ShellToolConfig,
}

/// Enforcement knobs for the built-in shell tool. `mode` is one of
/// `"deny"` (default), `"allowlist"`, or `"full"`; see
/// `orb_tools::builtin::ShellMode` for what each one permits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellToolConfig {
    #[serde(default = "default_shell_mode")]
    pub mode: String,
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

fn default_shell_mode() -> String {
    "deny".into()
}

impl Default for ShellToolConfig {
    fn default() -> Self {
        Self { mode: default_shell_mode(), allowlist: Vec::new(), deny: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_true")]
    pub mock: bool,
    pub broadcaster_host: String,
    pub broadcaster_port: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mock: true,
            broadcaster_host: "127.0.0.1".into(),
            broadcaster_port: 8765,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorConfig {
    pub match_threshold: f32,
    pub fallback_confidence: f32,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.5,
            fallback_confidence: 0.1,
        }
    }
}
