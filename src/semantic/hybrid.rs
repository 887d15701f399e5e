//! Hybrid search combining vector similarity and keyword matching.
//!
//! The final score is a fixed linear blend:
//!   score(d) = 0.7 * cosine(query, d) + 0.3 * keyword(query, d)
//!
//! Keyword scoring is deliberately simple: a literal title match wins outright,
//! otherwise the share of query tokens found in the title or the cleaned url.

use std::cmp::Ordering;

use serde::Serialize;

use crate::items::Item;
use crate::semantic::index::{cosine_similarity, VectorStore};
use crate::semantic::preprocess::{clean_title, clean_url};

/// Weight of the vector similarity in the final score.
pub const VECTOR_WEIGHT: f32 = 0.7;

/// Weight of the keyword score in the final score.
pub const KEYWORD_WEIGHT: f32 = 0.3;

/// A ranked search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub item: Item,
    /// Blended score used for ranking
    pub score: f32,
    pub vector_score: f32,
    pub keyword_score: f32,
}

/// Keyword score of an item for a query, in [0, 1].
pub fn keyword_score(query: &str, item: &Item) -> f32 {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return 0.0;
    }

    let title = clean_title(&item.title).to_lowercase();
    if title.contains(&query) {
        return 1.0;
    }

    let tokens: Vec<&str> = query.split_whitespace().collect();
    if tokens.is_empty() {
        return 0.0;
    }

    let url = clean_url(&item.url).to_lowercase();
    let matched = tokens
        .iter()
        .filter(|token| title.contains(*token) || url.contains(*token))
        .count();

    matched as f32 / tokens.len() as f32
}

/// Score every stored item against the query and return the `top_k` best.
///
/// Ties on the blended score are broken by item id ascending.
pub fn rank(
    query: &str,
    query_vector: &[f32],
    store: &VectorStore,
    top_k: usize,
) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = store
        .iter()
        .map(|(_, entry)| {
            let vector_score = cosine_similarity(query_vector, &entry.embedding);
            let keyword_score = keyword_score(query, &entry.item);
            SearchHit {
                item: entry.item.clone(),
                score: VECTOR_WEIGHT * vector_score + KEYWORD_WEIGHT * keyword_score,
                vector_score,
                keyword_score,
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.item.id.cmp(&b.item.id))
    });
    hits.truncate(top_k);

    hits
}
