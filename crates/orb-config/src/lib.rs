// SPDX-License-Identifier: Apache-2.0
//! Layered YAML configuration and state/workspace path resolution for the
//! OpenRoboBrain core runtime. Kept dependency-free from the runtime crates
//! it configures, matching the rest of the workspace's crate split.
mod loader;
mod paths;
mod schema;

pub use loader::load;
pub use paths::{state_dir_for, workspace_dir_for};
pub use schema::{
    AgentConfig, BehaviorConfig, BrainPipelineConfig, BridgeConfig, CompactorConfig, CoreConfig,
    ContextBuilderConfig, DataConfig, LlmConfig, MemoryRankerConfig, ResetPolicyConfig,
    SessionStoreConfig, ToolPolicyConfig,
};
