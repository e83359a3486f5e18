// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::{CompletionRequest, ResponseEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// The opaque inference interface the agent loop calls once per turn.
///
/// The core treats whatever sits behind this trait as a black box: given a
/// [`CompletionRequest`], it returns a stream of [`ResponseEvent`]s. Concrete
/// vendor wiring (HTTP clients, auth, retries, model catalogs) lives outside
/// this crate entirely — this crate only defines the seam and ships the mock
/// implementations used for deterministic testing.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display and logging.
    fn name(&self) -> &str;

    /// Model identifier as reported to callers.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;
}
