// SPDX-License-Identifier: Apache-2.0
//! Behavior matching, the LLM/rule-based fallback behavior, and the
//! top-level `process()` orchestrator tying behaviors to the bridge,
//! broadcaster, and memory stream.
pub mod behavior;
pub mod fallback;
pub mod process;

pub use behavior::{Behavior, BehaviorContext, BehaviorMatcher, BehaviorOutput, ProposedCommand};
pub use fallback::FallbackBehavior;
pub use process::{ExecutionMode, Orchestrator, ProcessResult};
