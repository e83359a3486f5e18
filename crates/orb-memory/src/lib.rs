// SPDX-License-Identifier: Apache-2.0
//! Ranked memory stream: create/retrieve/filter over an agent's memories,
//! with a five-signal ranker (recency, importance, relevance, frequency,
//! context affinity) fused by weighted min-max normalization.
pub mod ranker;
pub mod stream;
pub mod types;

pub use ranker::rank;
pub use stream::{MemoryStats, MemoryStream};
pub use types::{Memory, MemoryError, MemoryType, RankedMemory, RankerWeights, SignalBreakdown};
