//! Transcript serialization for the summarizer.
//!
//! Messages are rendered as `[role] content` lines. Oversized message
//! bodies are truncated per-block, and if the whole transcript still
//! exceeds the serialized cap, the **oldest** blocks are dropped first —
//! the newest material is the most likely to matter to the summary.

use wake_core::messages::Message;

/// Truncation limit for a single message body in the transcript.
pub const BLOCK_CHAR_LIMIT: usize = 2_000;

/// Marker inserted when leading blocks are dropped to fit the cap.
pub const OMISSION_MARKER: &str = "[earlier messages omitted]";

fn render_block(message: &Message) -> String {
    let body = if message.content.len() > BLOCK_CHAR_LIMIT {
        let mut end = BLOCK_CHAR_LIMIT;
        while !message.content.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &message.content[..end])
    } else {
        message.content.clone()
    };
    format!("[{}] {}", message.role, body)
}

/// Serialize messages into a transcript bounded by `max_chars`.
///
/// Blocks are separated by blank lines. When the serialized transcript
/// would exceed `max_chars`, oldest blocks are dropped and replaced by a
/// single omission marker.
#[must_use]
pub fn serialize_transcript(messages: &[Message], max_chars: usize) -> String {
    let blocks: Vec<String> = messages.iter().map(render_block).collect();
    let full_len: usize = blocks.iter().map(|b| b.len() + 2).sum();
    if full_len <= max_chars {
        return blocks.join("\n\n");
    }

    // Keep the newest blocks that fit after reserving room for the marker.
    let reserve = OMISSION_MARKER.len() + 2;
    let mut kept: Vec<&str> = Vec::new();
    let mut used = reserve;
    for block in blocks.iter().rev() {
        let cost = block.len() + 2;
        if used + cost > max_chars {
            break;
        }
        used += cost;
        kept.push(block);
    }
    kept.push(OMISSION_MARKER);
    kept.reverse();
    kept.join("\n\n")
}
