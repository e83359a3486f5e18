// SPDX-License-Identifier: Apache-2.0
//! The wire between a translated action and the real-time controller. A
//! production deployment swaps in a transport that publishes to ROS2; tests
//! and default configuration use one that reports immediate success.
use async_trait::async_trait;

use crate::translator::{CerebellumAction, CerebellumFeedback, ExecutionStatus};

#[async_trait]
pub trait ActionTransport: Send + Sync {
    async fn publish(&self, command_id: &str, action: &CerebellumAction) -> CerebellumFeedback;
}

/// Reports every action as completed immediately. Used in mock bridge mode
/// and as the default when no real controller transport is configured.
#[derive(Default)]
pub struct ImmediateSuccessTransport;

#[async_trait]
impl ActionTransport for ImmediateSuccessTransport {
    async fn publish(&self, command_id: &str, action: &CerebellumAction) -> CerebellumFeedback {
        CerebellumFeedback::success(command_id, &action.action_id)
    }
}

/// A feedback status other than completed for an action, used to build
/// aggregate command status.
pub fn is_failure(status: ExecutionStatus) -> bool {
    matches!(status, ExecutionStatus::Failed | ExecutionStatus::Timeout | ExecutionStatus::Cancelled)
}
