// SPDX-License-Identifier: Apache-2.0
//! Opaque streaming inference interface.
//!
//! Defines the seam between the agent loop and whatever answers its
//! completion requests. This crate carries no vendor HTTP clients — the
//! concrete backend is wired in by whatever embeds the core runtime. For
//! tests and the fallback behavior's rule-based path, [`mock::MockProvider`]
//! and [`mock::ScriptedMockProvider`] provide deterministic stand-ins.
pub mod mock;
pub mod provider;
pub mod types;

pub use mock::{MockProvider, ScriptedMockProvider};
pub use provider::{ModelProvider, ResponseStream};
pub use types::{
    tokens_for, CompletionRequest, FunctionCall, Message, MessageContent, ResponseEvent, Role,
    ToolSchema, Usage,
};
