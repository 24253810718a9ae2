//! Reciprocal Rank Fusion: combine an ordered keyword list and an ordered vector list
//! into one ranking, deterministically.

use std::collections::HashMap;

use rag_model::PointId;

pub const RRF_K: f64 = 60.0;

#[derive(Debug, Clone, Copy)]
struct Ranks {
    keyword: Option<usize>,
    vector: Option<usize>,
}

/// `score(p) = Σ_lists 1 / (k + rank_list(p))`, 1-based ranks, summed only over the lists
/// a point actually appears in. Ties break by `(keyword_rank, vector_rank, pointId)` with
/// missing ranks sorting last, so the ordering is fully deterministic.
pub fn fuse(keyword: &[PointId], vector: &[PointId]) -> Vec<PointId> {
    let mut ranks: HashMap<PointId, Ranks> = HashMap::new();
    for (i, p) in keyword.iter().enumerate() {
        ranks.entry(p.clone()).or_insert(Ranks { keyword: None, vector: None }).keyword = Some(i + 1);
    }
    for (i, p) in vector.iter().enumerate() {
        ranks.entry(p.clone()).or_insert(Ranks { keyword: None, vector: None }).vector = Some(i + 1);
    }

    let mut scored: Vec<(PointId, f64, Ranks)> = ranks
        .into_iter()
        .map(|(p, r)| {
            let mut score = 0.0;
            if let Some(k) = r.keyword {
                score += 1.0 / (RRF_K + k as f64);
            }
            if let Some(v) = r.vector {
                score += 1.0 / (RRF_K + v as f64);
            }
            (p, score, r)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.2.keyword.unwrap_or(usize::MAX).cmp(&b.2.keyword.unwrap_or(usize::MAX)))
            .then_with(|| a.2.vector.unwrap_or(usize::MAX).cmp(&b.2.vector.unwrap_or(usize::MAX)))
            .then_with(|| a.0.cmp(&b.0))
    });

    scored.into_iter().map(|(p, _, _)| p).collect()
}
