// SPDX-License-Identifier: Apache-2.0
//! Session persistence, context assembly, the phased agent run loop, and
//! sub-agent spawning for the OpenRoboBrain core runtime.
pub mod agent_loop;
pub mod compactor;
pub mod context_builder;
pub mod events;
pub mod session_store;
pub mod spawner;

pub use agent_loop::{AgentLoop, Hook, HookRegistry, Phase, QueueMode, RunContext, RunResult, RunSnapshot, RunStatus, ToolCallSummary};
pub use compactor::{CompactionOutcome, CompactionStore, Compactor};
pub use context_builder::ContextBuilder;
pub use events::{ChunkingHandler, StreamEvent, StreamHandler};
pub use session_store::{MessageRole, Session, SessionMessage, SessionState, SessionStore, SessionStoreError};
pub use spawner::{AnnounceMessage, CleanupMode, SpawnRequest, SpawnResult, SpawnStatus, SubAgentSpawner, ANNOUNCE_SKIP};
