//! Duplicate and degenerate chunk removal.
//!
//! Handbooks repeat themselves: boilerplate notices, repeated tables of
//! contents, copy-pasted policy paragraphs. Only the first occurrence of
//! each distinct text is kept, where "distinct" ignores case and
//! whitespace layout.

use std::collections::HashSet;

use crate::chunk::char_len;
use crate::models::{Chunk, Segment};

/// Default minimum chunk length in characters.
pub const DEFAULT_MIN_CHUNK_LEN: usize = 50;

/// Normalized form used to compare chunks: lowercase, whitespace runs
/// collapsed to a single space.
pub fn dedup_key(content: &str) -> String {
    content
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Remove duplicates and too-short segments, assigning `chunk_id`s.
///
/// Order is preserved. A segment survives if its key has not been seen
/// before and its trimmed content is longer than `min_chunk_len`
/// characters. `chunk_id` is the 0-based position in the returned list.
pub fn dedupe(segments: Vec<Segment>, min_chunk_len: usize) -> Vec<Chunk> {
    let mut seen = HashSet::new();
    let mut chunks = Vec::with_capacity(segments.len());
    let mut dropped = 0usize;

    for segment in segments {
        if char_len(segment.content.trim()) <= min_chunk_len {
            dropped += 1;
            continue;
        }
        if !seen.insert(dedup_key(&segment.content)) {
            dropped += 1;
            continue;
        }
        let chunk_id = chunks.len();
        chunks.push(segment.into_chunk(chunk_id));
    }

    if dropped > 0 {
        tracing::debug!(dropped, kept = chunks.len(), "removed duplicate or short chunks");
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(content: &str) -> Segment {
        Segment {
            content: content.to_string(),
            heading: "h".to_string(),
            level: 1,
            context: Vec::new(),
            sub_section: None,
            total_sub_sections: 1,
        }
    }

    #[test]
    fn test_dedup_key_normalizes() {
        assert_eq!(dedup_key("  Hello\n\tWORLD  again "), "hello world again");
    }

    #[test]
    fn test_duplicates_removed_in_order() {
        let a = "Alpha paragraph with enough words to count";
        let b = "Bravo paragraph with enough words to count";
        let a_variant = "ALPHA   paragraph with\nenough words to count";
        let chunks = dedupe(vec![seg(a), seg(b), seg(a_variant)], 10);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, a);
        assert_eq!(chunks[1].content, b);
    }

    #[test]
    fn test_unique_chunks_never_dropped() {
        let inputs: Vec<String> = (0..20)
            .map(|i| format!("Unique paragraph number {} with some padding text", i))
            .collect();
        let chunks = dedupe(inputs.iter().map(|s| seg(s)).collect(), 10);
        assert_eq!(chunks.len(), 20);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.content, inputs[i]);
        }
    }

    #[test]
    fn test_chunk_ids_contiguous_after_drops() {
        let long = "x".repeat(60);
        let chunks = dedupe(
            vec![seg("tiny"), seg(&long), seg(&long), seg(&"y".repeat(60))],
            50,
        );
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].metadata.chunk_id, 0);
        assert_eq!(chunks[1].metadata.chunk_id, 1);
        assert!(chunks[1].content.starts_with('y'));
    }

    #[test]
    fn test_min_length_is_exclusive() {
        let exactly = "z".repeat(50);
        let above = "w".repeat(51);
        let chunks = dedupe(vec![seg(&exactly), seg(&above)], DEFAULT_MIN_CHUNK_LEN);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, above);
    }
}
