// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Observation,
    Reflection,
    Plan,
    Fact,
    Preference,
    Spatial,
    Safety,
}

/// A single remembered fact, observation, or plan.
///
/// `importance` is fixed at creation. `memory_strength` and `access_count`
/// are monotonically non-decreasing; `last_accessed_at >= created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub memory_id: String,
    pub description: String,
    pub memory_type: MemoryType,
    pub importance: f32,
    pub access_count: u32,
    pub memory_strength: f32,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub tags: Vec<String>,
}

impl Memory {
    pub fn new(description: impl Into<String>, memory_type: MemoryType, importance: f32, tags: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            memory_id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            memory_type,
            importance: importance.clamp(0.0, 10.0),
            access_count: 0,
            memory_strength: 1.0,
            embedding: None,
            created_at: now,
            last_accessed_at: now,
            tags,
        }
    }
}

/// A candidate memory with its fused ranking score and per-signal breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedMemory {
    pub memory: Memory,
    pub final_score: f32,
    pub signals: SignalBreakdown,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SignalBreakdown {
    pub recency: f32,
    pub importance: f32,
    pub relevance: f32,
    pub frequency: f32,
    pub context_affinity: f32,
}

/// Per-signal weights for the ranker's linear fusion.
#[derive(Debug, Clone, Copy)]
pub struct RankerWeights {
    pub recency: f32,
    pub importance: f32,
    pub relevance: f32,
    pub frequency: f32,
    pub context_affinity: f32,
}

impl Default for RankerWeights {
    fn default() -> Self {
        Self { recency: 1.0, importance: 1.5, relevance: 2.0, frequency: 0.3, context_affinity: 1.0 }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("unknown memory id: {0}")]
    UnknownMemoryId(String),
}
