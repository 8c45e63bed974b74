//! Turn coordination: strict per-conversation serialization with
//! last-write-wins supersession.
//!
//! A turn begins when the user's message arrives and ends when the
//! agent's response is appended. If a newer turn begins for the same
//! conversation while an older one is still in flight, the older turn is
//! allowed to finish its work but its result is discarded at completion
//! time — no partial or interleaved message ordering is possible.

use dashmap::DashMap;
use wake_core::ids::ConversationId;

/// Handle for an in-flight turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnTicket {
    /// Conversation the turn belongs to.
    pub conversation_id: ConversationId,
    pub(crate) serial: u64,
}

/// Outcome of completing a turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The turn's response was appended at the given sequence number.
    Appended {
        /// Sequence number of the appended agent message.
        seq: u64,
    },
    /// A newer turn superseded this one; the response was discarded.
    Discarded,
}

/// Per-conversation turn serial tracker.
#[derive(Debug, Default)]
pub(crate) struct TurnTracker {
    serials: DashMap<String, u64>,
}

impl TurnTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Begin a new turn, superseding any in-flight one.
    pub(crate) fn begin(&self, conversation_id: &ConversationId) -> TurnTicket {
        let mut entry = self
            .serials
            .entry(conversation_id.as_str().to_owned())
            .or_insert(0);
        *entry += 1;
        TurnTicket {
            conversation_id: conversation_id.clone(),
            serial: *entry,
        }
    }

    /// Whether the ticket still identifies the newest turn.
    pub(crate) fn is_current(&self, ticket: &TurnTicket) -> bool {
        self.serials
            .get(ticket.conversation_id.as_str())
            .is_some_and(|serial| *serial == ticket.serial)
    }
}
