use serde::{Deserialize, Serialize};

use crate::models::{MemoryCategory, MemoryStatus};

/// A side action requested by the response generator.
///
/// Closed set of variants, parsed once: the agent loop matches these
/// exhaustively instead of pattern-scanning free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentCommand {
    Dm {
        user_id: String,
        text: String,
    },
    Post {
        conversation_id: String,
        text: String,
    },
    React {
        conversation_id: String,
        ts: String,
        emoji: String,
    },
    Ping {
        user_id: String,
    },
}

/// A memory the generator wants persisted.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryEntry {
    pub summary: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub status: MemoryStatus,
    #[serde(default)]
    pub category: MemoryCategory,
    #[serde(default = "default_true")]
    pub should_persist: bool,
}

fn default_true() -> bool {
    true
}

/// Parsed generator output.
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub reply: String,
    pub memory_entries: Vec<MemoryEntry>,
    pub commands: Vec<AgentCommand>,
    pub raw: String,
}

#[derive(Debug, Deserialize)]
struct WireReply {
    reply: String,
    #[serde(default)]
    memory_entries: Vec<MemoryEntry>,
    #[serde(default)]
    commands: Vec<AgentCommand>,
}

/// Parse the generator's raw text into a structured reply.
///
/// The JSON object may be embedded in surrounding prose. Anything that
/// does not parse cleanly (missing object, bad JSON, unknown command
/// variant) falls back to using the raw text verbatim as the reply, so
/// a malformed response never fails the turn.
pub fn parse_agent_reply(raw: &str) -> AgentReply {
    let fallback = || AgentReply {
        reply: raw.trim().to_string(),
        memory_entries: Vec::new(),
        commands: Vec::new(),
        raw: raw.to_string(),
    };

    let Some(json_span) = extract_json_object(raw) else {
        return fallback();
    };

    match serde_json::from_str::<WireReply>(json_span) {
        Ok(wire) => AgentReply {
            reply: wire.reply,
            memory_entries: wire.memory_entries,
            commands: wire.commands,
            raw: raw.to_string(),
        },
        Err(error) => {
            tracing::debug!(%error, "Failed to parse structured reply, using raw text");
            fallback()
        }
    }
}

/// The outermost `{ ... }` span in the text, if any.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}
