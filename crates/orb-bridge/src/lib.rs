// SPDX-License-Identifier: Apache-2.0
//! Brain-cerebellum command translation, dispatch, and the WebSocket
//! broadcaster that mirrors dispatched commands to external subscribers.
pub mod bridge;
pub mod broadcaster;
pub mod translator;
pub mod transport;

pub use bridge::{BrainCerebellumBridge, CommandOutcome};
pub use broadcaster::{BroadcasterStats, CommandBroadcaster};
pub use transport::ActionTransport;
pub use translator::{
    BrainCommand, CerebellumAction, CerebellumFeedback, CommandPriority, CommandTranslator, ExecutionStatus, GraspCommandTranslator, MoveCommandTranslator,
    TranslatorRegistry,
};
