//! Simple Token Counter
//!
//! Approximate token counting for LLM models.
//! Uses character-based estimation; good enough to guard context limits
//! before a prompt carrying a large schema is sent.

use super::*;

/// Simple token counter using character-based estimation
#[derive(Debug, Clone, Default)]
pub struct SimpleTokenCounter;

impl SimpleTokenCounter {
    pub fn new() -> Self {
        Self
    }
}

impl TokenCounter for SimpleTokenCounter {
    fn count_messages(&self, messages: &[Message], model: &str) -> usize {
        messages
            .iter()
            // role + formatting overhead
            .map(|m| 3 + self.count_text(&m.content, model))
            .sum()
    }

    fn count_text(&self, text: &str, _model: &str) -> usize {
        // ~4 characters per token
        (text.chars().count() / 4).max(1)
    }

    fn get_max_tokens(&self, model: &str) -> usize {
        match model {
            m if m.contains("gpt-4") && m.contains("turbo") => 128_000,
            m if m.contains("gpt-4o") || m.contains("gpt-4.1") => 128_000,
            m if m.contains("gpt-4") => 8_192,
            m if m.contains("gpt-3.5-turbo") => 16_385,
            m if m.starts_with("claude") => 200_000,
            _ => 32_768,
        }
    }
}
