use serde::{Deserialize, Serialize};

/// A conversation the authenticated user is a member of.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub name: Option<String>,
    pub is_direct_message: bool,
}

impl Conversation {
    /// Display label for logs: the channel name when there is one,
    /// otherwise the raw ID.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// An immutable fetched chat message.
///
/// `ts` doubles as the message ID: within a conversation, timestamps are
/// unique and totally ordered, and compare correctly as strings in the
/// form the API returns them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub ts: String,
    pub conversation_id: String,
    pub author_id: String,
    pub text: String,
    pub thread_ts: Option<String>,
    pub reply_count: u32,
}

impl Message {
    /// Whether this message is the parent of a thread.
    pub fn is_thread_parent(&self) -> bool {
        self.reply_count > 0
    }

    /// Whether this message is a reply inside a thread (not the parent).
    pub fn is_thread_reply(&self) -> bool {
        match &self.thread_ts {
            Some(root) => *root != self.ts,
            None => false,
        }
    }

    /// The thread this message belongs to for reply purposes: its own
    /// thread root when it has one, otherwise itself.
    pub fn thread_key(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }
}
