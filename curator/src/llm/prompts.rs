//! Prompt templates for the response generator.

/// Baseline system prompt with workspace-specific guidance.
pub const SYSTEM_PROMPT: &str = "You are a helpful AI assistant integrated with a Slack workspace.\n\
\n\
Guidelines:\n\
- Timestamps are Unix seconds with a microsecond suffix (e.g. \"1234567890.123456\").\n\
- Channel IDs start with C (public), G (private), or D (DM); user IDs start with U or W.\n\
- Be concise. Replies go into threads to keep channels readable.\n";

/// Instructions for the structured reply format the agent parses.
pub const RESPONSE_FORMAT: &str = r#"
## Response format

Respond with a single JSON object:

{
  "reply": "Your response to the user",
  "memory_entries": [
    {
      "summary": "One-line summary of the memory",
      "details": "Longer description with context",
      "status": "active",
      "category": "general",
      "should_persist": true
    }
  ],
  "commands": []
}

Only create memory entries for durable facts or commitments: preferences,
decisions, tasks and deadlines, key facts about projects or people. Do not
record trivia, ephemeral chatter, or things already present in the provided
context. Set "should_persist": false when unsure. Use an empty array when
nothing is worth keeping.

Memory fields: status is one of "active", "completed", "archived";
category is one of "general", "task", "preference", "decision", "fact".

Commands are optional side actions:
  {"type": "dm", "user_id": "U123", "text": "..."}
  {"type": "post", "conversation_id": "C123", "text": "..."}
  {"type": "react", "conversation_id": "C123", "ts": "123.456", "emoji": "white_check_mark"}
  {"type": "ping", "user_id": "U123"}
"#;

/// Full system prompt: baseline + response format + optional operator
/// extension.
pub fn build_system_prompt(extra: Option<&str>) -> String {
    let mut prompt = format!("{SYSTEM_PROMPT}{RESPONSE_FORMAT}");
    if let Some(extra) = extra.filter(|e| !e.trim().is_empty()) {
        prompt.push('\n');
        prompt.push_str(extra);
    }
    prompt
}

/// User-turn prompt combining retrieved context with the inbound message.
pub fn build_user_prompt(
    context_block: &str,
    author_id: &str,
    conversation_id: &str,
    text: &str,
) -> String {
    format!(
        "{context_block}\n\nMessage from <@{author_id}> in {conversation_id}:\n{text}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_includes_format_instructions() {
        let prompt = build_system_prompt(None);
        assert!(prompt.contains("\"reply\""));
        assert!(prompt.contains("\"memory_entries\""));
        assert!(prompt.contains("\"should_persist\""));
    }

    #[test]
    fn test_operator_extension_appended() {
        let prompt = build_system_prompt(Some("Always answer in haiku."));
        assert!(prompt.ends_with("Always answer in haiku."));
    }

    #[test]
    fn test_blank_extension_ignored() {
        assert_eq!(build_system_prompt(Some("   ")), build_system_prompt(None));
    }

    #[test]
    fn test_user_prompt_carries_context_and_message() {
        let prompt = build_user_prompt("## Relevant memories\n", "U1", "C9", "what's up?");
        assert!(prompt.starts_with("## Relevant memories"));
        assert!(prompt.contains("<@U1>"));
        assert!(prompt.contains("C9"));
        assert!(prompt.ends_with("what's up?"));
    }
}
