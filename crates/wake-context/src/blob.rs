//! The assembled context blob.

use serde::{Deserialize, Serialize};
use wake_core::ids::NodeId;
use wake_core::messages::Message;
use wake_store::RetrievedRecord;

/// A self-model fact selected for the context.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfFact {
    /// Node the fact comes from.
    pub node_id: NodeId,
    /// Node type as a string (capability, limitation, ...).
    pub node_type: String,
    /// The claim content.
    pub content: String,
    /// Node confidence.
    pub confidence: f32,
    /// Whether the claim is backed by evidence.
    pub grounded: bool,
    /// Estimated tokens for the rendered fact.
    pub tokens: u32,
}

/// The assembled context for one turn, tiered by priority.
#[derive(Clone, Debug, Default)]
pub struct ContextBlob {
    /// Tier 1: identity kernel lines (fixed small cost).
    pub kernel: Vec<String>,
    /// Tier 2: hot recent messages, verbatim.
    pub hot_messages: Vec<Message>,
    /// Tier 3: retrieved summaries/observations relevant to the turn.
    pub retrieved: Vec<RetrievedRecord>,
    /// Tier 4: relevant self-model facts.
    pub self_facts: Vec<SelfFact>,
    /// Total estimated tokens across all tiers.
    pub total_tokens: u32,
}

impl ContextBlob {
    /// Render the blob as a single prompt string.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.kernel.is_empty() {
            out.push_str("# Identity\n");
            for line in &self.kernel {
                out.push_str(line);
                out.push('\n');
            }
            out.push('\n');
        }
        if !self.retrieved.is_empty() {
            out.push_str("# Recalled memory\n");
            for item in &self.retrieved {
                out.push_str("- ");
                out.push_str(&item.record.text);
                out.push('\n');
            }
            out.push('\n');
        }
        if !self.self_facts.is_empty() {
            out.push_str("# Self-model\n");
            for fact in &self.self_facts {
                out.push_str(&format!("- ({}) {}\n", fact.node_type, fact.content));
            }
            out.push('\n');
        }
        if !self.hot_messages.is_empty() {
            out.push_str("# Conversation\n");
            for message in &self.hot_messages {
                out.push_str(&format!("[{}] {}\n", message.role, message.content));
            }
        }
        out
    }
}
