//! Term-frequency keyword search over an in-memory chunk list.
//!
//! This is the fallback path whenever vector search is unavailable,
//! fails, or comes back empty. It needs nothing but the chunk text, so a
//! document indexed without any embedding backend is still searchable.
//!
//! # Scoring
//!
//! - The query is lowercased, punctuation becomes whitespace, and terms of
//!   two characters or fewer and common English stop-words are dropped.
//!   At most [`MAX_QUERY_TERMS`] terms are kept.
//! - A chunk's score is the sum, over query terms, of how often the term
//!   occurs as a case-insensitive substring of the chunk.
//! - Zero-score chunks are excluded; ties keep chunk order.
//! - A query with no usable terms returns the first `top_k` chunks.

use crate::models::{Chunk, SearchHit};

/// Upper bound on query terms considered for scoring.
pub const MAX_QUERY_TERMS: usize = 20;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "for", "from", "had", "has",
    "have", "he", "her", "his", "i", "if", "in", "into", "is", "it", "its", "more", "not", "of",
    "on", "or", "our", "she", "than", "that", "the", "their", "them", "there", "these", "they",
    "this", "those", "to", "was", "we", "were", "what", "when", "where", "which", "who", "will",
    "with", "would",
];

/// Extract the scoring terms from a raw query, in query order.
pub fn query_terms(query: &str) -> Vec<String> {
    let cleaned: String = query
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|w| w.chars().count() > 2 && !STOP_WORDS.contains(w))
        .take(MAX_QUERY_TERMS)
        .map(str::to_string)
        .collect()
}

/// Rank `chunks` against `query` and return the best `top_k` hits.
pub fn keyword_search(chunks: &[Chunk], query: &str, top_k: usize) -> Vec<SearchHit> {
    let terms = query_terms(query);

    if terms.is_empty() {
        return chunks
            .iter()
            .take(top_k)
            .map(|c| SearchHit {
                chunk_id: c.metadata.chunk_id,
                score: 0.0,
            })
            .collect();
    }

    let mut scored: Vec<(usize, usize)> = chunks
        .iter()
        .filter_map(|c| {
            let lowered = c.content.to_lowercase();
            let score: usize = terms.iter().map(|t| lowered.matches(t.as_str()).count()).sum();
            (score > 0).then_some((c.metadata.chunk_id, score))
        })
        .collect();

    // sort_by is stable, so equal scores stay in chunk order.
    scored.sort_by(|a, b| b.1.cmp(&a.1));

    scored
        .into_iter()
        .take(top_k)
        .map(|(chunk_id, score)| SearchHit {
            chunk_id,
            score: score as f32,
        })
        .collect()
}
