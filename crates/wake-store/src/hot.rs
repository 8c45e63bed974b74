//! The hot context: summaries plus the verbatim message tail.

use wake_core::messages::{Message, total_tokens};

use crate::records::Summary;

/// Prefix for a summary rendered into the message stream.
pub const RECALLED_CONTEXT_PREFIX: &str = "[Recalled context]";

/// Structured view of a conversation's hot context.
///
/// `summaries` cover everything before the hot boundary, in range order;
/// `tail` is the verbatim messages at or after it. Together with any
/// flagged gaps they cover the full history with no overlap.
#[derive(Clone, Debug)]
pub struct HotContext {
    /// Summaries in `start_seq` order.
    pub summaries: Vec<Summary>,
    /// Verbatim tail messages in sequence order.
    pub tail: Vec<Message>,
}

impl HotContext {
    /// Total estimated tokens: rendered summaries plus tail.
    #[must_use]
    pub fn total_tokens(&self) -> u32 {
        let summary_tokens: u32 = self.summaries.iter().map(|s| s.token_count).sum();
        summary_tokens + total_tokens(&self.tail)
    }

    /// Render as an ordered message list bounded by `max_tokens`.
    ///
    /// Summaries become system messages carrying the summary body. If the
    /// rendered list still exceeds the budget (pathological histories,
    /// shrunk budgets), the oldest entries are dropped first; the most
    /// recent message is always kept so the current turn stays visible.
    #[must_use]
    pub fn render(&self, max_tokens: u32) -> Vec<Message> {
        let mut rendered: Vec<Message> = self
            .summaries
            .iter()
            .map(|s| Message::system(format!("{RECALLED_CONTEXT_PREFIX} {}", s.body)))
            .collect();
        rendered.extend(self.tail.iter().cloned());

        let mut start = 0;
        let mut total = total_tokens(&rendered);
        while total > max_tokens && start + 1 < rendered.len() {
            total -= rendered[start].token_count;
            start += 1;
        }
        rendered.split_off(start)
    }
}
