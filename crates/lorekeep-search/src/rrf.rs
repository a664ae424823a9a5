//! Weighted reciprocal rank fusion.
//!
//! Each ranked list contributes `weight / (k + rank + 1)` to every candidate
//! it contains, at the candidate's 0-based rank in that list. Candidates are
//! keyed by `(item_id, chunk_index)`; a chunk absent from a list simply gets
//! nothing from it, so appearing in both lists always beats appearing in one
//! at the same ranks.

use std::collections::HashMap;

use lorekeep_core::ChunkHit;
use uuid::Uuid;

/// A fused candidate with its combined score.
#[derive(Debug, Clone)]
pub struct FusedCandidate {
    pub hit: ChunkHit,
    pub score: f32,
}

/// Fuse ranked lists, each paired with its list weight.
///
/// Returns candidates sorted by fused score descending; ties break on the
/// candidate key so the ordering is deterministic.
pub fn fuse(lists: &[(&[ChunkHit], f32)], k: f32) -> Vec<FusedCandidate> {
    let mut merged: HashMap<(Uuid, i32), FusedCandidate> = HashMap::new();

    for (hits, weight) in lists {
        for (rank, hit) in hits.iter().enumerate() {
            let contribution = weight / (k + rank as f32 + 1.0);
            merged
                .entry((hit.item_id, hit.chunk_index))
                .and_modify(|c| c.score += contribution)
                .or_insert_with(|| FusedCandidate {
                    hit: hit.clone(),
                    score: contribution,
                });
        }
    }

    let mut fused: Vec<FusedCandidate> = merged.into_values().collect();
    fused.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| (a.hit.item_id, a.hit.chunk_index).cmp(&(b.hit.item_id, b.hit.chunk_index)))
    });
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorekeep_core::{defaults, SourceType};

    fn hit(item_id: Uuid, chunk_index: i32, score: f32) -> ChunkHit {
        ChunkHit {
            item_id,
            chunk_index,
            score,
            text: format!("chunk {chunk_index}"),
            source_type: SourceType::Note,
            source_locator: None,
        }
    }

    #[test]
    fn test_both_lists_beat_single_list_at_same_ranks() {
        let shared = Uuid::new_v4();
        let lonely = Uuid::new_v4();
        // `shared` sits at rank 0 in both lists; `lonely` at rank 0 in one.
        let lexical = vec![hit(shared, 0, 0.5), hit(Uuid::new_v4(), 0, 0.4)];
        let vector = vec![hit(shared, 0, 0.9), hit(lonely, 0, 0.8)];

        let fused = fuse(
            &[
                (&lexical, defaults::RRF_LEXICAL_WEIGHT),
                (&vector, defaults::RRF_VECTOR_WEIGHT),
            ],
            defaults::RRF_K,
        );

        let shared_score = fused
            .iter()
            .find(|c| c.hit.item_id == shared)
            .map(|c| c.score)
            .unwrap();
        let lonely_score = fused
            .iter()
            .find(|c| c.hit.item_id == lonely)
            .map(|c| c.score)
            .unwrap();
        assert!(shared_score > lonely_score);
        assert_eq!(fused[0].hit.item_id, shared);
    }

    #[test]
    fn test_contribution_formula() {
        let id = Uuid::new_v4();
        let list = vec![hit(id, 0, 1.0)];
        let fused = fuse(&[(&list, 1.0)], 60.0);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 1.0 / 61.0).abs() < 1e-6);
    }

    #[test]
    fn test_rank_decay_within_one_list() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let list = vec![hit(first, 0, 0.9), hit(second, 0, 0.8)];
        let fused = fuse(&[(&list, 1.0)], 60.0);
        assert_eq!(fused[0].hit.item_id, first);
        assert!(fused[0].score > fused[1].score);
    }

    #[test]
    fn test_list_weight_scales_contribution() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let lexical = vec![hit(a, 0, 0.9)];
        let vector = vec![hit(b, 0, 0.9)];
        let fused = fuse(&[(&lexical, 1.0), (&vector, 1.2)], 60.0);
        // Same rank, heavier list wins.
        assert_eq!(fused[0].hit.item_id, b);
    }

    #[test]
    fn test_same_item_different_chunks_stay_distinct() {
        let id = Uuid::new_v4();
        let list = vec![hit(id, 0, 0.9), hit(id, 1, 0.8)];
        let fused = fuse(&[(&list, 1.0)], 60.0);
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn test_empty_lists_fuse_to_nothing() {
        let fused = fuse(&[(&[], 1.0), (&[], 1.2)], 60.0);
        assert!(fused.is_empty());
    }
}
