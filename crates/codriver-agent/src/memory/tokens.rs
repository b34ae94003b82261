//! Token counting for memory accounting.
//!
//! Uses the `cl100k_base` encoding.  Building the encoder is expensive, so
//! one [`TokenCounter`] is created per memory and reused.  If the encoder
//! cannot be constructed or fails on input, counts fall back to the
//! characters-divided-by-four approximation.

use tiktoken_rs::{CoreBPE, cl100k_base};

use crate::llm::types::ChatMessage;

/// Counts tokens for strings and messages.
pub struct TokenCounter {
    encoder: Option<CoreBPE>,
}

impl TokenCounter {
    /// Create a counter, falling back to approximation if the encoding data
    /// cannot be loaded.
    pub fn new() -> Self {
        let encoder = match cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                tracing::warn!(error = %e, "cl100k_base unavailable, using char/4 approximation");
                None
            }
        };
        Self { encoder }
    }

    /// Count tokens in a text string.
    pub fn count(&self, text: &str) -> usize {
        match &self.encoder {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => text.len() / 4,
        }
    }

    /// Count tokens in a message by serializing it to JSON first, so block
    /// structure and tool inputs are accounted for.
    pub fn count_message(&self, message: &ChatMessage) -> usize {
        match serde_json::to_string(message) {
            Ok(serialized) => self.count(&serialized),
            Err(_) => message.text().len() / 4,
        }
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}
