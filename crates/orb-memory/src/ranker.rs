// SPDX-License-Identifier: Apache-2.0
use chrono::Utc;

use crate::types::{Memory, RankedMemory, RankerWeights, SignalBreakdown};

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        (dot / (na * nb)).clamp(-1.0, 1.0)
    }
}

fn recency_score(mem: &Memory) -> f32 {
    let hours = (Utc::now() - mem.last_accessed_at).num_milliseconds() as f32 / 3_600_000.0;
    let delta_h = hours.max(0.0);
    let strength = mem.memory_strength.max(1.0);
    (-std::f32::consts::LN_2 * delta_h / (24.0 * strength)).exp()
}

fn importance_score(mem: &Memory) -> f32 {
    mem.importance.clamp(0.0, 10.0) / 10.0
}

fn relevance_score(mem: &Memory, query_embedding: Option<&[f32]>) -> f32 {
    match (query_embedding, &mem.embedding) {
        (Some(q), Some(e)) => cosine(q, e),
        _ => 0.0,
    }
}

fn frequency_score(mem: &Memory, max_access_count: u32) -> f32 {
    if mem.access_count == 0 {
        return 0.0;
    }
    let denom = ((1 + max_access_count.max(1)) as f32).ln();
    if denom == 0.0 {
        0.0
    } else {
        ((1 + mem.access_count) as f32).ln() / denom
    }
}

fn context_affinity_score(mem: &Memory, recently_activated: &[&Memory]) -> f32 {
    let Some(mem_embedding) = &mem.embedding else { return 0.0 };
    let mut weighted_sum = 0.0f32;
    let mut weight_total = 0.0f32;
    for (i, act) in recently_activated.iter().enumerate() {
        if act.memory_id == mem.memory_id {
            continue;
        }
        let Some(act_embedding) = &act.embedding else { continue };
        let w = 0.5f32.powi(i as i32);
        weighted_sum += w * cosine(mem_embedding, act_embedding);
        weight_total += w;
    }
    if weight_total == 0.0 {
        0.0
    } else {
        weighted_sum / weight_total
    }
}

/// Min-max normalize a signal's raw scores to `[0, 1]`. All-equal inputs
/// (including a single candidate) normalize to zero.
fn min_max_normalize(values: &[f32]) -> Vec<f32> {
    let min = values.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if (max - min).abs() < f32::EPSILON {
        vec![0.0; values.len()]
    } else {
        values.iter().map(|v| (v - min) / (max - min)).collect()
    }
}

/// Rank `candidates` against a query by five fused signals. `recently_activated`
/// is most-recent-first, as produced by `MemoryStream::recently_activated`.
pub fn rank(
    candidates: &[Memory],
    query_embedding: Option<&[f32]>,
    recently_activated: &[&Memory],
    weights: RankerWeights,
    top_k: usize,
) -> Vec<RankedMemory> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let max_access_count = candidates.iter().map(|m| m.access_count).max().unwrap_or(0);

    let recency: Vec<f32> = candidates.iter().map(recency_score).collect();
    let importance: Vec<f32> = candidates.iter().map(importance_score).collect();
    let relevance: Vec<f32> = candidates.iter().map(|m| relevance_score(m, query_embedding)).collect();
    let frequency: Vec<f32> = candidates.iter().map(|m| frequency_score(m, max_access_count)).collect();
    let context_affinity: Vec<f32> =
        candidates.iter().map(|m| context_affinity_score(m, recently_activated)).collect();

    let recency_n = min_max_normalize(&recency);
    let importance_n = min_max_normalize(&importance);
    let relevance_n = min_max_normalize(&relevance);
    let frequency_n = min_max_normalize(&frequency);
    let context_affinity_n = min_max_normalize(&context_affinity);

    let mut ranked: Vec<RankedMemory> = candidates
        .iter()
        .enumerate()
        .map(|(i, mem)| {
            let signals = SignalBreakdown {
                recency: recency_n[i],
                importance: importance_n[i],
                relevance: relevance_n[i],
                frequency: frequency_n[i],
                context_affinity: context_affinity_n[i],
            };
            let final_score = weights.recency * signals.recency
                + weights.importance * signals.importance
                + weights.relevance * signals.relevance
                + weights.frequency * signals.frequency
                + weights.context_affinity * signals.context_affinity;
            RankedMemory { memory: mem.clone(), final_score, signals }
        })
        .collect();

    ranked.sort_by(|a, b| b.final_score.partial_cmp(&a.final_score).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(top_k);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryType;

    fn mem(desc: &str, importance: f32, access_count: u32, embedding: Option<Vec<f32>>) -> Memory {
        let mut m = Memory::new(desc, MemoryType::Fact, importance, vec![]);
        m.access_count = access_count;
        m.embedding = embedding;
        m
    }

    #[test]
    fn empty_candidates_yields_empty_ranking() {
        let r = rank(&[], None, &[], RankerWeights::default(), 10);
        assert!(r.is_empty());
    }

    #[test]
    fn single_candidate_normalizes_to_zero_but_still_ranked() {
        let candidates = vec![mem("a", 5.0, 1, None)];
        let r = rank(&candidates, None, &[], RankerWeights::default(), 10);
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn higher_importance_ranks_above_lower_importance_all_else_equal() {
        let candidates = vec![mem("low", 1.0, 0, None), mem("high", 9.0, 0, None)];
        let r = rank(&candidates, None, &[], RankerWeights::default(), 10);
        assert_eq!(r[0].memory.description, "high");
    }

    #[test]
    fn relevance_uses_cosine_similarity_to_query_embedding() {
        let candidates = vec![
            mem("aligned", 5.0, 0, Some(vec![1.0, 0.0])),
            mem("orthogonal", 5.0, 0, Some(vec![0.0, 1.0])),
        ];
        let r = rank(&candidates, Some(&[1.0, 0.0]), &[], RankerWeights::default(), 10);
        assert_eq!(r[0].memory.description, "aligned");
    }

    #[test]
    fn frequency_score_zero_access_count_is_zero() {
        let candidates = vec![mem("never", 5.0, 0, None), mem("often", 5.0, 100, None)];
        let r = rank(&candidates, None, &[], RankerWeights::default(), 10);
        let never = r.iter().find(|rm| rm.memory.description == "never").unwrap();
        assert_eq!(never.signals.frequency, 0.0);
    }

    #[test]
    fn context_affinity_skips_self_and_missing_embeddings() {
        let mut target = mem("target", 5.0, 0, Some(vec![1.0, 0.0]));
        target.memory_id = "target-id".into();
        let activated = vec![target.clone()];
        let refs: Vec<&Memory> = activated.iter().collect();
        let r = rank(&[target], None, &refs, RankerWeights::default(), 10);
        // The only "recently activated" memory is itself, which must be skipped.
        assert_eq!(r[0].signals.context_affinity, 0.0);
    }

    #[test]
    fn top_k_truncates_results() {
        let candidates: Vec<Memory> = (0..5).map(|i| mem(&format!("m{i}"), i as f32, 0, None)).collect();
        let r = rank(&candidates, None, &[], RankerWeights::default(), 2);
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn results_sorted_descending_by_final_score() {
        let candidates = vec![mem("low", 0.0, 0, None), mem("mid", 5.0, 0, None), mem("high", 10.0, 0, None)];
        let r = rank(&candidates, None, &[], RankerWeights::default(), 10);
        for w in r.windows(2) {
            assert!(w[0].final_score >= w[1].final_score);
        }
    }
}
