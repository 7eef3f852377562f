use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{CuratorError, Result};
use crate::models::{Conversation, Message};
use crate::slack::ConversationClient;

/// In-memory chat backend for poller tests.
///
/// Channel histories and thread replies are stored ascending; fetch
/// failures can be injected per conversation or per thread.
#[derive(Default)]
pub struct MockClient {
    conversations: Mutex<Vec<Conversation>>,
    history: Mutex<HashMap<String, Vec<Message>>>,
    replies: Mutex<HashMap<(String, String), Vec<Message>>>,
    fail_history: Mutex<HashSet<String>>,
    fail_replies: Mutex<HashSet<(String, String)>>,
    posted: Mutex<Vec<(String, String, Option<String>)>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&self, id: &str) {
        self.conversations.lock().unwrap().push(Conversation {
            id: id.to_string(),
            name: Some(format!("#{id}")),
            is_direct_message: false,
        });
    }

    pub fn add_dm(&self, id: &str) {
        self.conversations.lock().unwrap().push(Conversation {
            id: id.to_string(),
            name: None,
            is_direct_message: true,
        });
    }

    pub fn message(conversation_id: &str, ts: &str, author_id: &str, text: &str) -> Message {
        Message {
            ts: ts.to_string(),
            conversation_id: conversation_id.to_string(),
            author_id: author_id.to_string(),
            text: text.to_string(),
            thread_ts: None,
            reply_count: 0,
        }
    }

    pub fn reply(conversation_id: &str, thread_ts: &str, ts: &str, author_id: &str, text: &str) -> Message {
        Message {
            ts: ts.to_string(),
            conversation_id: conversation_id.to_string(),
            author_id: author_id.to_string(),
            text: text.to_string(),
            thread_ts: Some(thread_ts.to_string()),
            reply_count: 0,
        }
    }

    pub fn set_history(&self, conversation_id: &str, messages: Vec<Message>) {
        self.history
            .lock()
            .unwrap()
            .insert(conversation_id.to_string(), messages);
    }

    pub fn set_replies(&self, conversation_id: &str, thread_ts: &str, messages: Vec<Message>) {
        self.replies.lock().unwrap().insert(
            (conversation_id.to_string(), thread_ts.to_string()),
            messages,
        );
    }

    pub fn fail_history_for(&self, conversation_id: &str, failing: bool) {
        let mut failures = self.fail_history.lock().unwrap();
        if failing {
            failures.insert(conversation_id.to_string());
        } else {
            failures.remove(conversation_id);
        }
    }

    pub fn fail_replies_for(&self, conversation_id: &str, thread_ts: &str, failing: bool) {
        let key = (conversation_id.to_string(), thread_ts.to_string());
        let mut failures = self.fail_replies.lock().unwrap();
        if failing {
            failures.insert(key);
        } else {
            failures.remove(&key);
        }
    }

    pub fn posted_messages(&self) -> Vec<(String, String, Option<String>)> {
        self.posted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversationClient for MockClient {
    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        Ok(self.conversations.lock().unwrap().clone())
    }

    async fn history_since(
        &self,
        conversation_id: &str,
        since_ts: Option<&str>,
    ) -> Result<Vec<Message>> {
        if self.fail_history.lock().unwrap().contains(conversation_id) {
            return Err(CuratorError::Slack(format!(
                "conversations.history: injected failure for {conversation_id}"
            )));
        }

        let history = self.history.lock().unwrap();
        let messages = history.get(conversation_id).cloned().unwrap_or_default();
        Ok(match since_ts {
            Some(since) => messages
                .into_iter()
                .filter(|m| m.ts.as_str() > since)
                .collect(),
            None => messages,
        })
    }

    async fn thread_replies(
        &self,
        conversation_id: &str,
        thread_ts: &str,
    ) -> Result<Vec<Message>> {
        let key = (conversation_id.to_string(), thread_ts.to_string());
        if self.fail_replies.lock().unwrap().contains(&key) {
            return Err(CuratorError::Slack(format!(
                "conversations.replies: injected failure for {conversation_id}/{thread_ts}"
            )));
        }

        Ok(self.replies.lock().unwrap().get(&key).cloned().unwrap_or_default())
    }

    async fn post_message(
        &self,
        conversation_id: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<String> {
        let mut posted = self.posted.lock().unwrap();
        posted.push((
            conversation_id.to_string(),
            text.to_string(),
            thread_ts.map(str::to_string),
        ));
        Ok(format!("posted.{}", posted.len()))
    }

    async fn add_reaction(&self, _conversation_id: &str, _ts: &str, _emoji: &str) -> Result<()> {
        Ok(())
    }

    async fn open_dm(&self, user_id: &str) -> Result<String> {
        Ok(format!("D-{user_id}"))
    }
}
