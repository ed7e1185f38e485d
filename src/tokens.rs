//! Rough token accounting for prompt budgets.
//!
//! Counts are estimates (about 4.5 characters per token for English prose),
//! good enough to compare sending a whole handbook against sending only the
//! retrieved chunks.

use serde::Serialize;

const CHARS_PER_TOKEN: f64 = 4.5;

/// Estimated token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() as f64 / CHARS_PER_TOKEN) as usize
}

/// Full document versus retrieved context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenSavings {
    pub full_chars: usize,
    pub full_tokens: usize,
    pub retrieved_chars: usize,
    pub retrieved_tokens: usize,
    pub token_reduction: usize,
    pub percent_saved: f64,
}

impl TokenSavings {
    pub fn compare(full_text: &str, retrieved_text: &str) -> Self {
        let full_tokens = estimate_tokens(full_text);
        let retrieved_tokens = estimate_tokens(retrieved_text);
        let token_reduction = full_tokens.saturating_sub(retrieved_tokens);
        let percent_saved = if full_tokens == 0 {
            0.0
        } else {
            token_reduction as f64 * 100.0 / full_tokens as f64
        };
        Self {
            full_chars: full_text.chars().count(),
            full_tokens,
            retrieved_chars: retrieved_text.chars().count(),
            retrieved_tokens,
            token_reduction,
            percent_saved,
        }
    }

    /// Multi-line human summary.
    pub fn render(&self) -> String {
        format!(
            "Full document:     {} chars, ~{} tokens\n\
             Retrieved context: {} chars, ~{} tokens\n\
             Saved:             ~{} tokens ({:.1}%)",
            format_number(self.full_chars as u64),
            format_number(self.full_tokens as u64),
            format_number(self.retrieved_chars as u64),
            format_number(self.retrieved_tokens as u64),
            format_number(self.token_reduction as u64),
            self.percent_saved,
        )
    }
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}
