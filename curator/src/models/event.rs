use crate::models::Message;

/// A message the agent should respond to, as yielded by the poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub conversation_id: String,
    /// Thread the reply belongs in: the message's thread root, or the
    /// message itself for channel-level messages.
    pub thread_key: String,
    pub author_id: String,
    pub text: String,
    pub ts: String,
}

impl InboundEvent {
    pub fn from_message(msg: &Message) -> Self {
        Self {
            conversation_id: msg.conversation_id.clone(),
            thread_key: msg.thread_key().to_string(),
            author_id: msg.author_id.clone(),
            text: msg.text.clone(),
            ts: msg.ts.clone(),
        }
    }
}
