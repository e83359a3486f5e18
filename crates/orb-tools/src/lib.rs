// SPDX-License-Identifier: Apache-2.0
//! Tool registry, policy, executor, and built-in tools for the
//! OpenRoboBrain agent loop.
pub mod builtin;
pub mod executor;
pub mod policy;
pub mod registry;
pub mod risk;
pub mod tool;

pub use executor::{ExecutionContext, ToolExecutor, ToolResult, ToolStatus};
pub use policy::{Decision, PatternSet, ToolPolicy};
pub use registry::{Profile, ToolRegistry, ToolSchema};
pub use risk::{NoopRiskMonitor, RiskMonitor, RiskSubject, RiskVerdict};
pub use tool::{OutputCategory, Tool, ToolCall, ToolOutput, ToolOutputPart};
