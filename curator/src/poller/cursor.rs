use std::collections::HashMap;

/// Watermark value for a conversation that has never been observed.
pub const BEGINNING: &str = "0";

/// Identifies a watched thread within a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadKey {
    pub conversation_id: String,
    pub thread_ts: String,
}

impl ThreadKey {
    pub fn new(conversation_id: &str, thread_ts: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            thread_ts: thread_ts.to_string(),
        }
    }
}

/// The poller's moving frontier: per-conversation "last seen" watermarks
/// plus the set of actively watched threads with their own watermarks.
///
/// Plain data, no interior mutability: the poller task is the single
/// writer, and that is what keeps the update path race-free even when
/// fetches fan out.
#[derive(Debug, Default)]
pub struct CursorTracker {
    watermarks: HashMap<String, String>,
    watched: HashMap<ThreadKey, String>,
}

impl CursorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a conversation's watermark from its most recent message ts,
    /// or the beginning sentinel for an empty (or unreadable)
    /// conversation. Existing watermarks are left alone.
    pub fn seed(&mut self, conversation_id: &str, latest_ts: Option<&str>) {
        self.watermarks
            .entry(conversation_id.to_string())
            .or_insert_with(|| latest_ts.unwrap_or(BEGINNING).to_string());
    }

    pub fn is_seeded(&self, conversation_id: &str) -> bool {
        self.watermarks.contains_key(conversation_id)
    }

    /// Current watermark; the sentinel if the conversation was never
    /// seeded.
    pub fn watermark(&self, conversation_id: &str) -> String {
        self.watermarks
            .get(conversation_id)
            .cloned()
            .unwrap_or_else(|| BEGINNING.to_string())
    }

    /// Advance the watermark if `ts` is newer. Idempotent and
    /// order-independent within a batch: replaying or reordering
    /// observations cannot move the watermark backwards.
    pub fn advance(&mut self, conversation_id: &str, ts: &str) {
        let current = self
            .watermarks
            .entry(conversation_id.to_string())
            .or_insert_with(|| BEGINNING.to_string());
        if ts > current.as_str() {
            *current = ts.to_string();
        }
    }

    /// Register a thread for reply polling. First registration wins:
    /// re-watching an already-watched thread is a no-op.
    pub fn watch(&mut self, key: ThreadKey, last_seen_reply_ts: &str) {
        self.watched
            .entry(key)
            .or_insert_with(|| last_seen_reply_ts.to_string());
    }

    /// Remove a thread from the watch set. Returns whether it was
    /// watched.
    pub fn unwatch(&mut self, key: &ThreadKey) -> bool {
        self.watched.remove(key).is_some()
    }

    pub fn is_watched(&self, key: &ThreadKey) -> bool {
        self.watched.contains_key(key)
    }

    pub fn thread_watermark(&self, key: &ThreadKey) -> Option<String> {
        self.watched.get(key).cloned()
    }

    /// Advance a watched thread's reply watermark if `ts` is newer.
    /// A thread that was unwatched in the meantime is ignored.
    pub fn advance_thread(&mut self, key: &ThreadKey, ts: &str) {
        if let Some(current) = self.watched.get_mut(key) {
            if ts > current.as_str() {
                *current = ts.to_string();
            }
        }
    }

    /// Snapshot of the watch set in a stable order, for one fetch cycle.
    pub fn watched_threads(&self) -> Vec<(ThreadKey, String)> {
        let mut threads: Vec<(ThreadKey, String)> = self
            .watched
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        threads.sort_by(|a, b| a.0.cmp(&b.0));
        threads
    }

    pub fn watched_count(&self) -> usize {
        self.watched.len()
    }
}
