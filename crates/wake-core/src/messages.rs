//! The conversation message model.
//!
//! Messages are **immutable once written**: they are created when a turn
//! completes, read when their span is compacted, and never mutated after
//! creation. Token counts are estimated at construction and carried with
//! the message so budget checks never re-scan content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wake_tokens::estimator::estimate_body_tokens;

use crate::ids::MessageId;

/// Role of a message author.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The human user.
    User,
    /// The agent.
    Agent,
    /// System or tool output injected into the conversation.
    System,
}

impl Role {
    /// SQL-compatible string representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            "system" => Ok(Self::System),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A single conversation message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message ID.
    pub id: MessageId,
    /// Author role.
    pub role: Role,
    /// Message content.
    pub content: String,
    /// Creation timestamp (UTC).
    pub timestamp: DateTime<Utc>,
    /// Estimated token count including envelope overhead.
    pub token_count: u32,
    /// Model that produced the message, for agent messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_model: Option<String>,
}

impl Message {
    /// Create a message with the given role and content.
    ///
    /// The token count is estimated at construction.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        let token_count = estimate_body_tokens(&content);
        Self {
            id: MessageId::new(),
            role,
            content,
            timestamp: Utc::now(),
            token_count,
            source_model: None,
        }
    }

    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an agent message.
    #[must_use]
    pub fn agent(content: impl Into<String>) -> Self {
        Self::new(Role::Agent, content)
    }

    /// Create a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Attach the source model identifier.
    #[must_use]
    pub fn with_source_model(mut self, model: impl Into<String>) -> Self {
        self.source_model = Some(model.into());
        self
    }

    /// Whether this is a user message.
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    /// Whether this is an agent message.
    #[must_use]
    pub fn is_agent(&self) -> bool {
        self.role == Role::Agent
    }
}

/// Sum the token counts of a message slice.
#[must_use]
pub fn total_tokens(messages: &[Message]) -> u32 {
    messages.iter().map(|m| m.token_count).sum()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
