//! Character-based token estimation.

/// Approximate characters per token (consistent with common LLM tokenizers).
pub const CHARS_PER_TOKEN: u32 = 4;

/// Fixed envelope overhead added per message (role tag, separators).
pub const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

/// Estimate the token count of a text string.
///
/// Ceiling division so short non-empty strings never round to zero.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn estimate_text_tokens(text: &str) -> u32 {
    (text.len() as u32).div_ceil(CHARS_PER_TOKEN)
}

/// Estimate tokens for a message body including the envelope overhead.
#[must_use]
pub fn estimate_body_tokens(text: &str) -> u32 {
    estimate_text_tokens(text) + MESSAGE_OVERHEAD_TOKENS
}
