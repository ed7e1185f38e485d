//! Heading-aware document chunker.
//!
//! Splits markdown-ish handbook text into [`Segment`]s that follow the
//! document's own section structure. Each segment remembers its heading,
//! its depth, and the breadcrumb of ancestor headings so a chunk read in
//! isolation still says where it came from.
//!
//! All lengths are counted in `char`s, never bytes, so multi-byte text is
//! measured the same way a reader would count it.
//!
//! # Algorithm
//!
//! 1. Scan for heading lines (`#` to `######` followed by whitespace).
//!    Without headings, fall back to paragraph splitting.
//! 2. Each heading owns the text up to the next heading. Sections shorter
//!    than `min_section_len` are dropped as noise.
//! 3. The context of a section is built by walking earlier headings
//!    backwards, taking every heading shallower than the last one taken,
//!    until a level-1 heading is reached.
//! 4. Sections longer than `chunk_size × long_section_factor` are
//!    re-chunked on paragraph boundaries, each piece prefixed with
//!    `# {title}` (later pieces with `# {title} (continued)`).
//! 5. If every heading section was dropped, the whole document is split by
//!    paragraphs instead.
//!
//! # Example
//!
//! ```rust
//! use handbook_rag_core::chunk::{split_document, ChunkParams};
//!
//! let text = format!("# Intro\n\n{}", "Some body text. ".repeat(10));
//! let segments = split_document(&text, &ChunkParams::default());
//! assert_eq!(segments.len(), 1);
//! assert_eq!(segments[0].heading, "Intro");
//! assert!(segments[0].context.is_empty());
//! ```

use crate::models::Segment;

/// Synthetic titles are only taken from a first line shorter than this.
const MAX_TITLE_CHARS: usize = 100;

/// Parameters that shape chunk boundaries.
///
/// `chunk_size` and `chunk_overlap` are persisted with every index; a
/// change to either forces a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    /// Target chunk length in characters.
    pub chunk_size: usize,
    /// Characters carried over between consecutive paragraph chunks.
    pub chunk_overlap: usize,
    /// Heading sections shorter than this are discarded.
    pub min_section_len: usize,
    /// Sections longer than `chunk_size * long_section_factor` are split.
    pub long_section_factor: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 50,
            min_section_len: 100,
            long_section_factor: 2,
        }
    }
}

impl ChunkParams {
    fn long_section_threshold(&self) -> usize {
        self.chunk_size.saturating_mul(self.long_section_factor)
    }
}

/// A heading line found in the source text.
#[derive(Debug, Clone, Copy)]
struct Heading<'a> {
    level: u8,
    title: &'a str,
    /// Byte offset of the start of the heading line.
    start: usize,
}

/// Split a document into ordered segments, following its heading structure.
///
/// Returns an empty list only for input that is empty or whitespace.
pub fn split_document(text: &str, params: &ChunkParams) -> Vec<Segment> {
    let headings = find_headings(text);
    if headings.is_empty() {
        tracing::debug!("no headings found, splitting by paragraphs");
        return paragraph_segments(text, params);
    }
    tracing::debug!(count = headings.len(), "found headings");

    let mut segments = Vec::new();

    // Text before the first heading is kept when it is substantial.
    let preamble = text[..headings[0].start].trim();
    if char_len(preamble) >= params.min_section_len.max(1) {
        segments.extend(paragraph_segments(preamble, params));
    }

    let mut kept_sections = 0usize;
    for (i, heading) in headings.iter().enumerate() {
        let end = headings.get(i + 1).map(|h| h.start).unwrap_or(text.len());
        let content = text[heading.start..end].trim();

        if char_len(content) < params.min_section_len {
            continue;
        }
        kept_sections += 1;

        let context = section_context(&headings, i);

        if char_len(content) > params.long_section_threshold() {
            let parts = split_long_section(content, heading.title, params.chunk_size);
            let total = parts.len();
            for (j, part) in parts.into_iter().enumerate() {
                segments.push(Segment {
                    content: part,
                    heading: heading.title.to_string(),
                    level: heading.level,
                    context: context.clone(),
                    sub_section: Some(j + 1),
                    total_sub_sections: total,
                });
            }
        } else {
            segments.push(Segment {
                content: content.to_string(),
                heading: heading.title.to_string(),
                level: heading.level,
                context,
                sub_section: None,
                total_sub_sections: 1,
            });
        }
    }

    if kept_sections == 0 {
        tracing::debug!("all heading sections below minimum length, splitting by paragraphs");
        return paragraph_segments(text, params);
    }

    segments
}

/// Split text on blank lines, merging paragraphs up to
/// `chunk_size - chunk_overlap` characters.
///
/// When a chunk is flushed, the next one starts with the last
/// `chunk_overlap` characters of it, so neighbouring chunks share a little
/// context.
pub fn split_paragraphs(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let limit = chunk_size.saturating_sub(chunk_overlap).max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for para in paragraphs(text).iter().flat_map(|p| hard_split(p, limit)) {
        let current_len = char_len(&current);
        let para_len = char_len(&para);
        if !current.is_empty() && current_len + 2 + para_len > limit {
            chunks.push(current.trim().to_string());
            current = if chunk_overlap > 0
                && current_len > chunk_overlap
                && chunk_overlap + 2 + para_len <= chunk_size
            {
                format!("{}\n\n{}", tail_chars(&current, chunk_overlap), para)
            } else {
                para
            };
        } else {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&para);
        }
    }

    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }

    chunks
}

/// Cut `text` into pieces of at most `max_chars` characters.
///
/// Cuts fall on the last newline inside the window, else the last sentence
/// end, else the last space, else exactly at `max_chars`.
fn hard_split(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut pieces = Vec::new();
    let mut remaining = text.trim();

    while char_len(remaining) > max_chars {
        let window_end = remaining
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());
        let window = &remaining[..window_end];
        let cut = window
            .rfind('\n')
            .map(|pos| pos + 1)
            .or_else(|| window.rfind(". ").map(|pos| pos + 2))
            .or_else(|| window.rfind(' ').map(|pos| pos + 1))
            .unwrap_or(window_end);

        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = remaining[cut..].trim_start();
    }

    if !remaining.is_empty() {
        pieces.push(remaining.to_string());
    }
    pieces
}

/// Paragraph splitting with synthetic titles, used when headings can't be.
fn paragraph_segments(text: &str, params: &ChunkParams) -> Vec<Segment> {
    split_paragraphs(text, params.chunk_size, params.chunk_overlap)
        .into_iter()
        .enumerate()
        .map(|(i, content)| {
            let heading = synthetic_title(&content, i);
            Segment {
                content,
                heading,
                level: 1,
                context: Vec::new(),
                sub_section: None,
                total_sub_sections: 1,
            }
        })
        .collect()
}

fn synthetic_title(content: &str, index: usize) -> String {
    let first_line = content.lines().next().unwrap_or("").trim();
    let first_line = parse_heading(first_line)
        .map(|(_, title)| title)
        .unwrap_or(first_line);
    if char_len(first_line) < MAX_TITLE_CHARS {
        first_line.to_string()
    } else {
        format!("Section {}", index + 1)
    }
}

/// Breadcrumb of ancestor titles for the heading at `idx`, outermost first.
fn section_context(headings: &[Heading<'_>], idx: usize) -> Vec<String> {
    let mut threshold = headings[idx].level;
    let mut context = Vec::new();

    for h in headings[..idx].iter().rev() {
        if h.level < threshold {
            context.push(h.title.to_string());
            threshold = h.level;
            if h.level == 1 {
                break;
            }
        }
    }

    context.reverse();
    context
}

/// Re-chunk an oversized section on paragraph boundaries.
///
/// The section's own heading line is replaced by a `# {title}` prefix on
/// every piece. Paragraphs too long to fit a piece are hard-split first, so
/// no piece exceeds `chunk_size` characters.
fn split_long_section(content: &str, title: &str, chunk_size: usize) -> Vec<String> {
    let body = content.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
    let title_len = char_len(title);
    let min_len = title_len + 10;
    // Room left for a paragraph behind the `# {title} (continued)` prefix.
    let max_para = chunk_size.saturating_sub(title_len + 16);

    let mut parts = Vec::new();
    let mut current = format!("# {}\n\n", title);

    for para in body.split("\n\n").flat_map(|p| hard_split(p, max_para)) {
        let para = para.as_str();
        let current_len = char_len(&current);
        if current_len + char_len(para) > chunk_size && current_len > min_len {
            parts.push(current.trim().to_string());
            current = format!("# {} (continued)\n\n{}\n\n", title, para);
        } else {
            current.push_str(para);
            current.push_str("\n\n");
        }
    }

    if char_len(&current) > min_len && !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }

    parts
}

fn find_headings(text: &str) -> Vec<Heading<'_>> {
    let mut headings = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if let Some((level, title)) = parse_heading(line) {
            headings.push(Heading {
                level,
                title,
                start: offset,
            });
        }
        offset += line.len();
    }
    headings
}

/// Parse `## Title` into `(2, "Title")`. Seven or more `#` is not a heading.
fn parse_heading(line: &str) -> Option<(u8, &str)> {
    let line = line.trim_end_matches(['\n', '\r']);
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with([' ', '\t']) {
        return None;
    }
    Some((hashes as u8, rest.trim()))
}

/// Paragraphs are runs of non-blank lines.
fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !lines.is_empty() {
                out.push(lines.join("\n"));
                lines.clear();
            }
        } else {
            lines.push(line);
        }
    }
    if !lines.is_empty() {
        out.push(lines.join("\n"));
    }
    out
}

pub(crate) fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// The last `n` characters of `s`.
fn tail_chars(s: &str, n: usize) -> &str {
    let len = char_len(s);
    if n >= len {
        return s;
    }
    let start = s
        .char_indices()
        .nth(len - n)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(word: &str, n: usize) -> String {
        vec![word; n].join(" ")
    }

    fn params(chunk_size: usize) -> ChunkParams {
        ChunkParams {
            chunk_size,
            ..ChunkParams::default()
        }
    }

    #[test]
    fn test_parse_heading() {
        assert_eq!(parse_heading("# Title"), Some((1, "Title")));
        assert_eq!(parse_heading("### Deep  \r\n"), Some((3, "Deep")));
        assert_eq!(parse_heading("####### Seven"), None);
        assert_eq!(parse_heading("#hashtag"), None);
        assert_eq!(parse_heading("plain"), None);
    }

    #[test]
    fn test_no_headings_uses_paragraphs() {
        let text = "First line of prose.\n\nSecond paragraph here.";
        let segments = split_document(text, &ChunkParams::default());
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].heading, "First line of prose.");
        assert_eq!(segments[0].level, 1);
        assert!(segments[0].context.is_empty());
        assert_eq!(segments[0].sub_section, None);
        assert_eq!(segments[0].total_sub_sections, 1);
    }

    #[test]
    fn test_short_section_dropped() {
        let text = format!(
            "# Short\n\n0123456789\n\n# Long\n\n{}",
            body("lorem", 30)
        );
        let segments = split_document(&text, &ChunkParams::default());
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].heading, "Long");
        assert!(!segments.iter().any(|s| s.content.contains("0123456789")));
    }

    #[test]
    fn test_context_breadcrumb() {
        let b = body("text", 30);
        let text = format!(
            "# Book\n{b}\n## Part\n{b}\n### Chapter\n{b}\n#### Detail\n{b}\n## Other\n{b}",
            b = b
        );
        let segments = split_document(&text, &ChunkParams::default());
        let contexts: Vec<(&str, Vec<String>)> = segments
            .iter()
            .map(|s| (s.heading.as_str(), s.context.clone()))
            .collect();
        assert_eq!(
            contexts,
            vec![
                ("Book", vec![]),
                ("Part", vec!["Book".to_string()]),
                ("Chapter", vec!["Book".to_string(), "Part".to_string()]),
                (
                    "Detail",
                    vec!["Book".to_string(), "Part".to_string(), "Chapter".to_string()]
                ),
                ("Other", vec!["Book".to_string()]),
            ]
        );
        assert_eq!(segments[2].level, 3);
    }

    #[test]
    fn test_context_skips_siblings() {
        let b = body("text", 30);
        let text = format!("## First\n{b}\n## Second\n{b}\n### Leaf\n{b}", b = b);
        let segments = split_document(&text, &ChunkParams::default());
        assert_eq!(segments[1].context, Vec::<String>::new());
        assert_eq!(segments[2].context, vec!["Second".to_string()]);
    }

    #[test]
    fn test_long_section_split() {
        // Each paragraph is 59 chars; with chunk_size 100 every paragraph
        // lands in its own piece.
        let para = body("word", 12);
        let paras = vec![para.as_str(); 5].join("\n\n");
        let text = format!("# Title\n\n{}", paras);
        let segments = split_document(&text, &params(100));

        assert_eq!(segments.len(), 5);
        assert!(segments[0].content.starts_with("# Title\n\nword"));
        for (i, s) in segments.iter().enumerate() {
            assert_eq!(s.heading, "Title");
            assert_eq!(s.sub_section, Some(i + 1));
            assert_eq!(s.total_sub_sections, 5);
            if i > 0 {
                assert!(s.content.starts_with("# Title (continued)\n\n"));
            }
            assert!(s.content.ends_with("word"));
        }
    }

    #[test]
    fn test_long_section_heading_not_repeated() {
        let para = body("word", 12);
        let paras = vec![para.as_str(); 5].join("\n\n");
        let text = format!("# Title\n\n{}", paras);
        let segments = split_document(&text, &params(100));
        assert_eq!(segments[0].content.matches("# Title").count(), 1);
    }

    #[test]
    fn test_all_sections_short_falls_back() {
        let text = "# A\nalpha\n\n# B\nbravo";
        let segments = split_document(text, &ChunkParams::default());
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].heading, "A");
        assert!(segments[0].content.contains("bravo"));
    }

    #[test]
    fn test_preamble_kept_when_substantial() {
        let text = format!("{}\n\n# Heading\n\n{}", body("intro", 30), body("main", 30));
        let segments = split_document(&text, &ChunkParams::default());
        assert_eq!(segments.len(), 2);
        assert!(segments[0].content.starts_with("intro"));
        assert_eq!(segments[1].heading, "Heading");
    }

    #[test]
    fn test_empty_text() {
        assert!(split_document("", &ChunkParams::default()).is_empty());
        assert!(split_document("  \n\n ", &ChunkParams::default()).is_empty());
    }

    #[test]
    fn test_split_paragraphs_overlap() {
        let a = "a".repeat(40);
        let b = "b".repeat(40);
        let chunks = split_paragraphs(&format!("{}\n\n{}", a, b), 60, 10);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], a);
        assert_eq!(chunks[1], format!("{}\n\n{}", "a".repeat(10), b));
    }

    #[test]
    fn test_split_paragraphs_zero_overlap() {
        let chunks = split_paragraphs("one one one\n\ntwo two two", 12, 0);
        assert_eq!(chunks, vec!["one one one", "two two two"]);
    }

    #[test]
    fn test_single_newline_document_is_bounded() {
        let text: String = (0..500)
            .map(|i| format!("Line {} of the handbook body text.\n", i))
            .collect();
        let params = ChunkParams::default();
        let segments = split_document(&text, &params);

        assert!(segments.len() > 1);
        for s in &segments {
            assert!(char_len(&s.content) <= params.chunk_size, "{} chars", char_len(&s.content));
        }
        assert!(segments[0].content.starts_with("Line 0 of"));
        assert!(segments.last().unwrap().content.ends_with("Line 499 of the handbook body text."));
    }

    #[test]
    fn test_long_section_without_blank_lines_is_bounded() {
        let sentences: String = (0..300)
            .map(|i| format!("Students must follow rule {} at all times.\n", i))
            .collect();
        let text = format!("# Policy\n{}", sentences);
        let params = ChunkParams::default();
        let segments = split_document(&text, &params);

        assert!(segments.len() > 2);
        let total = segments.len();
        for (i, s) in segments.iter().enumerate() {
            assert!(char_len(&s.content) <= params.chunk_size, "{} chars", char_len(&s.content));
            assert_eq!(s.heading, "Policy");
            assert_eq!(s.sub_section, Some(i + 1));
            assert_eq!(s.total_sub_sections, total);
            if i == 0 {
                assert!(s.content.starts_with("# Policy\n\nStudents must follow rule 0"));
            } else {
                assert!(s.content.starts_with("# Policy (continued)\n\n"));
            }
        }
    }

    #[test]
    fn test_hard_split_cut_points() {
        assert_eq!(hard_split("aaa. bbb ccc", 9), vec!["aaa.", "bbb ccc"]);
        assert_eq!(hard_split("one two\nthree four", 12), vec!["one two", "three four"]);
        assert_eq!(hard_split("short", 10), vec!["short"]);
        assert!(hard_split("   ", 10).is_empty());
    }

    #[test]
    fn test_hard_split_without_spaces_counts_chars() {
        let pieces = hard_split(&"é".repeat(25), 10);
        let lens: Vec<usize> = pieces.iter().map(|p| char_len(p)).collect();
        assert_eq!(lens, vec![10, 10, 5]);
    }

    #[test]
    fn test_synthetic_title_for_long_first_line() {
        let text = "x".repeat(150);
        let segments = split_document(&text, &ChunkParams::default());
        assert_eq!(segments[0].heading, "Section 1");
    }

    #[test]
    fn test_multibyte_lengths_in_chars() {
        // 60 three-byte chars: 180 bytes but only 60 characters.
        let body = "é".repeat(60);
        let text = format!("# Ünïcode\n\n{}", body);
        let segments = split_document(&text, &ChunkParams::default());
        // 71 chars total, below the 100 minimum, so the paragraph fallback
        // produces a single chunk.
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].heading, "Ünïcode");
        assert_eq!(tail_chars(&body, 3), "ééé");
    }

    #[test]
    fn test_deterministic() {
        let b = body("text", 40);
        let text = format!("# One\n{b}\n## Two\n{b}", b = b);
        let s1 = split_document(&text, &params(50));
        let s2 = split_document(&text, &params(50));
        assert_eq!(s1, s2);
    }
}
