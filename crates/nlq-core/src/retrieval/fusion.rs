//! Rank fusion for combining keyword and dense retrieval result lists.
//! Adapted from reciprocal-rank-fusion / linear-combination fusion over
//! ranked document lists, retargeted at ranked schema-table candidates.

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub keyword_weight: f32,
    pub semantic_weight: f32,
    pub rrf_k: f32,
    pub min_semantic_similarity: f32,
    pub top_n: usize,
    pub fk_expansion_delta: f32,
    pub max_tables: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            keyword_weight: 0.3,
            semantic_weight: 0.7,
            rrf_k: 60.0,
            min_semantic_similarity: 0.3,
            top_n: 8,
            fk_expansion_delta: 0.15,
            max_tables: 12,
        }
    }
}

impl From<&crate::config::RetrievalSettings> for RetrievalConfig {
    fn from(settings: &crate::config::RetrievalSettings) -> Self {
        Self {
            min_semantic_similarity: settings.similarity_threshold,
            top_n: settings.top_k,
            fk_expansion_delta: settings.fk_expansion_delta,
            max_tables: settings.max_tables,
            ..Self::default()
        }
    }
}

/// score(table) = sum of 1/(k + rank) across the keyword and dense lists.
pub fn reciprocal_rank_fusion(
    keyword_results: &[(String, f32)],
    semantic_results: &[(String, f32)],
    k: f32,
) -> Vec<(String, f32)> {
    let mut scores: HashMap<String, f32> = HashMap::new();

    for (rank, (key, _)) in keyword_results.iter().enumerate() {
        *scores.entry(key.clone()).or_default() += 1.0 / (k + rank as f32);
    }
    for (rank, (key, _)) in semantic_results.iter().enumerate() {
        *scores.entry(key.clone()).or_default() += 1.0 / (k + rank as f32);
    }

    let mut results: Vec<(String, f32)> = scores.into_iter().collect();
    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    results
}

pub fn linear_combination(
    keyword_results: &[(String, f32)],
    semantic_results: &[(String, f32)],
    keyword_weight: f32,
    semantic_weight: f32,
) -> Vec<(String, f32)> {
    let mut scores: HashMap<String, f32> = HashMap::new();

    let max_keyword = keyword_results.first().map(|(_, s)| *s).unwrap_or(1.0).max(0.001);
    for (key, score) in keyword_results {
        *scores.entry(key.clone()).or_default() += (score / max_keyword) * keyword_weight;
    }

    let max_semantic = semantic_results.first().map(|(_, s)| *s).unwrap_or(1.0).max(0.001);
    for (key, score) in semantic_results {
        *scores.entry(key.clone()).or_default() += (score / max_semantic) * semantic_weight;
    }

    let mut results: Vec<(String, f32)> = scores.into_iter().collect();
    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    results
}
