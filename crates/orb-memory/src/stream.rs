// SPDX-License-Identifier: Apache-2.0
use std::collections::VecDeque;

use chrono::Utc;
use tracing::debug;

use crate::types::{Memory, MemoryError, MemoryType};

/// Scaling constant for the spaced-repetition strength boost applied on
/// retrieve: `boost = BOOST_CONSTANT * ln(1 + hours_since_last_access)`.
/// Larger gaps between retrieves yield larger boosts.
const BOOST_CONSTANT: f32 = 0.5;

/// Maximum length of the `recently_activated` deque (spreading-activation
/// window consumed by the ranker's context-affinity signal).
const RECENTLY_ACTIVATED_CAP: usize = 20;

#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryStats {
    pub total: usize,
    pub total_access_count: u64,
    pub avg_importance: f32,
    pub avg_strength: f32,
}

/// Holds all memories for one agent in insertion order.
pub struct MemoryStream {
    memories: Vec<Memory>,
    /// Most-recently-activated memory ids, head = most recent.
    recently_activated: VecDeque<String>,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self { memories: Vec::new(), recently_activated: VecDeque::new() }
    }

    /// Restore a stream from a previously persisted snapshot (insertion order
    /// preserved, `recently_activated` starts empty — it is a transient
    /// in-process hint, not carried across restarts).
    pub fn from_memories(memories: Vec<Memory>) -> Self {
        Self { memories, recently_activated: VecDeque::new() }
    }

    pub fn create(&mut self, memory: Memory) -> String {
        let id = memory.memory_id.clone();
        debug!(memory_id = %id, memory_type = ?memory.memory_type, "memory created");
        self.memories.push(memory);
        id
    }

    fn position(&self, memory_id: &str) -> Option<usize> {
        self.memories.iter().position(|m| m.memory_id == memory_id)
    }

    /// Retrieve a memory by id, bumping its access stats and strength.
    pub fn retrieve(&mut self, memory_id: &str) -> Result<&Memory, MemoryError> {
        let idx = self
            .position(memory_id)
            .ok_or_else(|| MemoryError::UnknownMemoryId(memory_id.to_string()))?;

        let now = Utc::now();
        let hours_since = (now - self.memories[idx].last_accessed_at).num_milliseconds() as f32 / 3_600_000.0;
        let boost = BOOST_CONSTANT * (1.0 + hours_since.max(0.0)).ln();

        {
            let mem = &mut self.memories[idx];
            mem.access_count += 1;
            mem.memory_strength += boost;
            mem.last_accessed_at = now;
        }

        self.recently_activated.retain(|id| id != memory_id);
        self.recently_activated.push_front(memory_id.to_string());
        self.recently_activated.truncate(RECENTLY_ACTIVATED_CAP);

        Ok(&self.memories[idx])
    }

    pub fn get(&self, memory_id: &str) -> Result<&Memory, MemoryError> {
        self.memories
            .iter()
            .find(|m| m.memory_id == memory_id)
            .ok_or_else(|| MemoryError::UnknownMemoryId(memory_id.to_string()))
    }

    pub fn get_all(&self) -> &[Memory] {
        &self.memories
    }

    pub fn filter_by_type(&self, memory_type: MemoryType) -> Vec<&Memory> {
        self.memories.iter().filter(|m| m.memory_type == memory_type).collect()
    }

    pub fn filter_by_tag(&self, tag: &str) -> Vec<&Memory> {
        self.memories.iter().filter(|m| m.tags.iter().any(|t| t == tag)).collect()
    }

    /// Memories activated most recently, head first, for spreading activation.
    pub fn recently_activated(&self) -> Vec<&Memory> {
        self.recently_activated.iter().filter_map(|id| self.get(id).ok()).collect()
    }

    pub fn stats(&self) -> MemoryStats {
        if self.memories.is_empty() {
            return MemoryStats::default();
        }
        let total = self.memories.len();
        let total_access_count: u64 = self.memories.iter().map(|m| m.access_count as u64).sum();
        let avg_importance = self.memories.iter().map(|m| m.importance).sum::<f32>() / total as f32;
        let avg_strength = self.memories.iter().map(|m| m.memory_strength).sum::<f32>() / total as f32;
        MemoryStats { total, total_access_count, avg_importance, avg_strength }
    }
}

impl Default for MemoryStream {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem(desc: &str) -> Memory {
        Memory::new(desc, MemoryType::Observation, 5.0, vec![])
    }

    #[test]
    fn create_and_get_round_trip() {
        let mut s = MemoryStream::new();
        let id = s.create(mem("cup is on the table"));
        assert_eq!(s.get(&id).unwrap().description, "cup is on the table");
    }

    #[test]
    fn get_unknown_id_errors() {
        let s = MemoryStream::new();
        assert!(matches!(s.get("nope"), Err(MemoryError::UnknownMemoryId(_))));
    }

    #[test]
    fn retrieve_increments_access_count() {
        let mut s = MemoryStream::new();
        let id = s.create(mem("a"));
        s.retrieve(&id).unwrap();
        assert_eq!(s.get(&id).unwrap().access_count, 1);
        s.retrieve(&id).unwrap();
        assert_eq!(s.get(&id).unwrap().access_count, 2);
    }

    #[test]
    fn retrieve_strictly_increases_strength() {
        let mut s = MemoryStream::new();
        let id = s.create(mem("a"));
        let s0 = s.get(&id).unwrap().memory_strength;
        s.retrieve(&id).unwrap();
        let s1 = s.get(&id).unwrap().memory_strength;
        assert!(s1 > s0, "strength should increase after a retrieve with a positive gap");
    }

    #[test]
    fn memory_strength_never_below_one() {
        let s = mem("a");
        assert!(s.memory_strength >= 1.0);
    }

    #[test]
    fn recently_activated_moves_retrieved_memory_to_head() {
        let mut s = MemoryStream::new();
        let a = s.create(mem("a"));
        let b = s.create(mem("b"));
        s.retrieve(&a).unwrap();
        s.retrieve(&b).unwrap();
        s.retrieve(&a).unwrap();
        let recent = s.recently_activated();
        assert_eq!(recent[0].memory_id, a);
    }

    #[test]
    fn recently_activated_capped_at_twenty() {
        let mut s = MemoryStream::new();
        let ids: Vec<String> = (0..25).map(|i| s.create(mem(&format!("m{i}")))).collect();
        for id in &ids {
            s.retrieve(id).unwrap();
        }
        assert_eq!(s.recently_activated().len(), 20);
    }

    #[test]
    fn filter_by_type_returns_only_matching() {
        let mut s = MemoryStream::new();
        s.create(mem("obs"));
        s.create(Memory::new("fact one", MemoryType::Fact, 5.0, vec![]));
        let facts = s.filter_by_type(MemoryType::Fact);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].description, "fact one");
    }

    #[test]
    fn filter_by_tag_returns_only_matching() {
        let mut s = MemoryStream::new();
        s.create(Memory::new("tagged", MemoryType::Fact, 1.0, vec!["kitchen".into()]));
        s.create(Memory::new("untagged", MemoryType::Fact, 1.0, vec![]));
        let tagged = s.filter_by_tag("kitchen");
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].description, "tagged");
    }

    #[test]
    fn stats_on_empty_stream_is_zeroed() {
        let s = MemoryStream::new();
        let stats = s.stats();
        assert_eq!(stats.total, 0);
    }

    #[test]
    fn stats_reports_total_and_averages() {
        let mut s = MemoryStream::new();
        s.create(Memory::new("a", MemoryType::Fact, 4.0, vec![]));
        s.create(Memory::new("b", MemoryType::Fact, 6.0, vec![]));
        let stats = s.stats();
        assert_eq!(stats.total, 2);
        assert!((stats.avg_importance - 5.0).abs() < 1e-6);
    }
}
