mod cursor;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::PollerConfig;
use crate::error::{CuratorError, Result};
use crate::models::{Conversation, InboundEvent, Message};
use crate::slack::{ConversationClient, Identity};

pub use cursor::{CursorTracker, ThreadKey, BEGINNING};

/// Watch-set change requested by the event consumer.
///
/// The watch set is owned by the poller task; consumers reach it only
/// through these commands, applied at the start of a cycle, so there is
/// a single writer no matter how many tasks hold a handle.
#[derive(Debug)]
enum WatchCommand {
    Watch {
        conversation_id: String,
        thread_ts: String,
        last_seen_reply_ts: String,
    },
    Unwatch {
        conversation_id: String,
        thread_ts: String,
    },
}

/// Cheap handle for registering threads with a running poller.
#[derive(Clone)]
pub struct PollerHandle {
    tx: mpsc::Sender<WatchCommand>,
}

impl PollerHandle {
    /// Start watching a thread for replies newer than
    /// `last_seen_reply_ts` (typically the ts of the reply the agent
    /// just posted).
    pub async fn watch(&self, conversation_id: &str, thread_ts: &str, last_seen_reply_ts: &str) {
        let command = WatchCommand::Watch {
            conversation_id: conversation_id.to_string(),
            thread_ts: thread_ts.to_string(),
            last_seen_reply_ts: last_seen_reply_ts.to_string(),
        };
        if self.tx.send(command).await.is_err() {
            tracing::warn!("Poller is gone; watch request dropped");
        }
    }

    pub async fn unwatch(&self, conversation_id: &str, thread_ts: &str) {
        let command = WatchCommand::Unwatch {
            conversation_id: conversation_id.to_string(),
            thread_ts: thread_ts.to_string(),
        };
        if self.tx.send(command).await.is_err() {
            tracing::warn!("Poller is gone; unwatch request dropped");
        }
    }
}

/// Polls the workspace for new channel messages and watched-thread
/// replies, yielding response-eligible messages as inbound events.
///
/// One fetch cycle runs to completion before the next is scheduled;
/// there is no cycle overlap and no fetch backlog from timer drift.
/// Within a cycle fetches fan out concurrently, but all watermark and
/// watch-set updates happen serially on the poller task afterwards.
pub struct Poller {
    client: Arc<dyn ConversationClient>,
    cursors: CursorTracker,
    conversations: Vec<Conversation>,
    self_id: String,
    mention_pattern: Regex,
    config: PollerConfig,
    control_tx: mpsc::Sender<WatchCommand>,
    control_rx: mpsc::Receiver<WatchCommand>,
    cycles: u64,
}

impl Poller {
    pub fn new(
        client: Arc<dyn ConversationClient>,
        identity: &Identity,
        handle: &str,
        config: PollerConfig,
    ) -> Result<Self> {
        let mention_pattern = mention_pattern(handle, &identity.user_id)?;
        let (control_tx, control_rx) = mpsc::channel(32);

        Ok(Self {
            client,
            cursors: CursorTracker::new(),
            conversations: Vec::new(),
            self_id: identity.user_id.clone(),
            mention_pattern,
            config,
            control_tx,
            control_rx,
            cycles: 0,
        })
    }

    pub fn handle(&self) -> PollerHandle {
        PollerHandle {
            tx: self.control_tx.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn cursors(&self) -> &CursorTracker {
        &self.cursors
    }

    /// List conversations and seed every watermark from the most recent
    /// message, so only messages arriving after startup are considered.
    ///
    /// Failing to list conversations is fatal; failing to read one
    /// conversation's history degrades that conversation to the
    /// beginning sentinel and moves on.
    pub async fn initialize(&mut self) -> Result<()> {
        self.conversations = self.client.list_conversations().await?;

        for conv in self.conversations.clone() {
            self.seed_conversation(&conv).await;
        }

        tracing::info!(
            conversations = self.conversations.len(),
            "Poller initialized"
        );
        Ok(())
    }

    async fn seed_conversation(&mut self, conv: &Conversation) {
        if self.cursors.is_seeded(&conv.id) {
            return;
        }

        match self.client.history_since(&conv.id, None).await {
            Ok(messages) => {
                let latest = messages.last().map(|m| m.ts.as_str());
                self.cursors.seed(&conv.id, latest);
            }
            Err(error) => {
                tracing::warn!(
                    conversation = conv.label(),
                    %error,
                    "Could not read history; watermark degraded to beginning"
                );
                self.cursors.seed(&conv.id, None);
            }
        }
    }

    /// Re-list conversations, seeding watermarks for newly discovered
    /// ones. A listing failure keeps the previous list.
    async fn refresh_conversations(&mut self) {
        match self.client.list_conversations().await {
            Ok(conversations) => {
                self.conversations = conversations;
                for conv in self.conversations.clone() {
                    self.seed_conversation(&conv).await;
                }
            }
            Err(error) => {
                tracing::warn!(%error, "Conversation refresh failed; keeping previous list");
            }
        }
    }

    /// One fetch cycle.
    ///
    /// Returns the cycle's events in delivery order: channel-level
    /// events first, then watched-thread replies, ascending ts within
    /// each source.
    pub async fn poll_once(&mut self) -> Vec<InboundEvent> {
        self.apply_watch_commands();

        let mut events = Vec::new();
        self.poll_conversations(&mut events).await;
        self.poll_watched_threads(&mut events).await;

        self.cycles += 1;
        events
    }

    fn apply_watch_commands(&mut self) {
        while let Ok(command) = self.control_rx.try_recv() {
            match command {
                WatchCommand::Watch {
                    conversation_id,
                    thread_ts,
                    last_seen_reply_ts,
                } => {
                    tracing::debug!(%conversation_id, %thread_ts, "Watching thread");
                    self.cursors
                        .watch(ThreadKey::new(&conversation_id, &thread_ts), &last_seen_reply_ts);
                }
                WatchCommand::Unwatch {
                    conversation_id,
                    thread_ts,
                } => {
                    tracing::debug!(%conversation_id, %thread_ts, "Unwatching thread");
                    self.cursors
                        .unwatch(&ThreadKey::new(&conversation_id, &thread_ts));
                }
            }
        }
    }

    async fn poll_conversations(&mut self, events: &mut Vec<InboundEvent>) {
        // Fan out fetches; every future owns its inputs so no cursor
        // state is touched until all results are in hand.
        let mut fetches = Vec::with_capacity(self.conversations.len());
        for conv in &self.conversations {
            let client = Arc::clone(&self.client);
            let conv = conv.clone();
            let since = self.cursors.watermark(&conv.id);
            fetches.push(async move {
                let result = client.history_since(&conv.id, Some(&since)).await;
                (conv, result)
            });
        }

        for (conv, result) in join_all(fetches).await {
            let messages = match result {
                Ok(messages) => messages,
                Err(error) => {
                    // Watermark untouched: the same window is retried
                    // next cycle.
                    tracing::warn!(conversation = conv.label(), %error, "History fetch failed");
                    continue;
                }
            };

            for msg in messages {
                self.cursors.advance(&conv.id, &msg.ts);

                if msg.author_id == self.self_id {
                    continue;
                }
                if self.should_respond(&msg, &conv) {
                    events.push(InboundEvent::from_message(&msg));
                }
            }
        }
    }

    async fn poll_watched_threads(&mut self, events: &mut Vec<InboundEvent>) {
        let watched = self.cursors.watched_threads();

        let mut fetches = Vec::with_capacity(watched.len());
        for (key, last_seen) in watched {
            let client = Arc::clone(&self.client);
            fetches.push(async move {
                let result = client
                    .thread_replies(&key.conversation_id, &key.thread_ts)
                    .await;
                (key, last_seen, result)
            });
        }

        for (key, last_seen, result) in join_all(fetches).await {
            let replies = match result {
                Ok(replies) => replies,
                Err(error) => {
                    tracing::warn!(
                        conversation = %key.conversation_id,
                        thread = %key.thread_ts,
                        %error,
                        "Thread replies fetch failed"
                    );
                    continue;
                }
            };

            for reply in replies {
                // Exclude the parent and anything already seen.
                if reply.ts == key.thread_ts || reply.ts.as_str() <= last_seen.as_str() {
                    continue;
                }

                // Self-authored replies advance the watermark too, so
                // the agent's own replies are never reprocessed.
                self.cursors.advance_thread(&key, &reply.ts);

                if reply.author_id == self.self_id {
                    continue;
                }
                events.push(thread_event(&key, &reply));
            }
        }
    }

    /// Response-eligibility policy: every DM, or any message mentioning
    /// the handle or the resolved user ID.
    fn should_respond(&self, msg: &Message, conv: &Conversation) -> bool {
        if conv.is_direct_message {
            return true;
        }
        self.mention_pattern.is_match(&msg.text)
    }

    /// Poll until cancelled, delivering events through `tx`.
    ///
    /// Cancellation is cooperative: it is observed between cycles, and
    /// a cycle already in flight runs to completion. The bounded channel
    /// gives backpressure: a slow consumer delays the next cycle
    /// instead of growing a backlog.
    pub async fn run(mut self, tx: mpsc::Sender<InboundEvent>, cancel: CancellationToken) {
        let interval = Duration::from_secs(self.config.poll_interval_secs);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Poller shutting down");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    if self.cycles > 0 && self.config.refresh_every_cycles > 0
                        && self.cycles % self.config.refresh_every_cycles == 0
                    {
                        self.refresh_conversations().await;
                    }

                    for event in self.poll_once().await {
                        if tx.send(event).await.is_err() {
                            tracing::info!("Event channel closed; poller stopping");
                            return;
                        }
                    }
                }
            }
        }
    }
}

fn thread_event(key: &ThreadKey, reply: &Message) -> InboundEvent {
    InboundEvent {
        conversation_id: key.conversation_id.clone(),
        thread_key: key.thread_ts.clone(),
        author_id: reply.author_id.clone(),
        text: reply.text.clone(),
        ts: reply.ts.clone(),
    }
}

/// Case-insensitive pattern matching `@handle` or `<@USER_ID>`.
fn mention_pattern(handle: &str, user_id: &str) -> Result<Regex> {
    Regex::new(&format!(
        "(?i)(?:@{}|<@{}>)",
        regex::escape(handle),
        regex::escape(user_id)
    ))
    .map_err(|e| CuratorError::Validation(format!("Invalid handle pattern: {e}")))
}
