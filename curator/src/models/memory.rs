use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MemoryCategory, MemoryStatus};

/// A durable unit of retrievable context.
///
/// The embedding is persisted alongside the record but not carried here;
/// it is written by the store and only ever read back as a similarity
/// score. Re-upserting the same `id` replaces the full record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub summary: String,
    pub details: String,
    pub author_id: Option<String>,
    pub conversation_id: Option<String>,
    pub thread_id: Option<String>,
    pub status: MemoryStatus,
    pub category: MemoryCategory,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryRecord {
    /// The text that gets embedded for similarity retrieval.
    pub fn embedding_text(&self) -> String {
        if self.details.is_empty() {
            self.summary.clone()
        } else {
            format!("{} {}", self.summary, self.details)
        }
    }
}

/// Input for creating or replacing a memory record.
///
/// `id: None` generates a fresh ID; `Some` replaces that record.
#[derive(Debug, Clone, Default)]
pub struct MemoryDraft {
    pub id: Option<String>,
    pub summary: String,
    pub details: String,
    pub author_id: Option<String>,
    pub conversation_id: Option<String>,
    pub thread_id: Option<String>,
    pub status: MemoryStatus,
    pub category: MemoryCategory,
}

/// Metadata restrictions applied as a conjunction during similarity
/// queries. Unset fields impose no restriction.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilters {
    pub author_id: Option<String>,
    pub conversation_id: Option<String>,
    pub thread_id: Option<String>,
    pub status: Option<MemoryStatus>,
    pub category: Option<MemoryCategory>,
}

impl MemoryFilters {
    pub fn is_empty(&self) -> bool {
        self.author_id.is_none()
            && self.conversation_id.is_none()
            && self.thread_id.is_none()
            && self.status.is_none()
            && self.category.is_none()
    }
}

/// A query hit: a stored record plus its similarity to the query text.
///
/// Score is `1 - cosine_distance`, so higher is more relevant. Transient;
/// never persisted.
#[derive(Debug, Clone)]
pub struct RankedMemory {
    pub record: MemoryRecord,
    pub score: f32,
}
