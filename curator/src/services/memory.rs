use std::sync::Arc;

use chrono::Utc;
use nanoid::nanoid;

use crate::db::{Database, MemoryRepository, MetadataRepository};
use crate::embeddings::Embedder;
use crate::error::{CuratorError, Result};
use crate::models::{MemoryDraft, MemoryFilters, MemoryRecord, RankedMemory};

/// A batch upsert that stored some records before failing.
///
/// Callers always learn which records made it; a partial write is never
/// reported as a full success.
#[derive(Debug)]
pub struct BatchUpsertError {
    pub stored: Vec<String>,
    pub source: CuratorError,
}

impl std::fmt::Display for BatchUpsertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "batch upsert failed after storing {} record(s): {}",
            self.stored.len(),
            self.source
        )
    }
}

impl std::error::Error for BatchUpsertError {}

/// The memory index: embedding plus metadata-tagged storage with
/// similarity retrieval.
pub struct MemoryService {
    db: Database,
    embeddings: Arc<dyn Embedder>,
}

impl MemoryService {
    pub fn new(db: Database, embeddings: Arc<dyn Embedder>) -> Self {
        Self { db, embeddings }
    }

    /// Guard against reusing an index built with a different embedding
    /// model. Records the dimension on first use; refuses to start on a
    /// mismatch since stored vectors would be incomparable.
    pub async fn ensure_dimensions(&self) -> Result<()> {
        let conn = self.db.connect()?;
        let expected = self.embeddings.dimensions();

        match MetadataRepository::get_embedding_dimensions(&conn).await? {
            None => MetadataRepository::set_embedding_dimensions(&conn, expected).await,
            Some(stored) if stored == expected => Ok(()),
            Some(stored) => Err(CuratorError::Validation(format!(
                "Memory index was built with {stored}-dimension embeddings but the configured \
                 model produces {expected}. Run with --reset-memory or change EMBEDDING_MODEL."
            ))),
        }
    }

    /// Create or replace one record. `draft.id = None` generates an ID.
    pub async fn upsert(&self, draft: MemoryDraft) -> Result<MemoryRecord> {
        let record = Self::draft_to_record(draft)?;
        let embedding = self.embeddings.embed_passage(&record.embedding_text()).await?;

        let conn = self.db.connect()?;
        MemoryRepository::upsert(&conn, &record, &embedding).await?;

        tracing::debug!(memory_id = %record.id, "Stored memory");
        Ok(record)
    }

    /// Store a batch, embedding all texts in one model pass.
    ///
    /// Validation runs up front so a bad draft fails the batch before
    /// anything is written. A store failure mid-batch reports the records
    /// that did get written.
    pub async fn upsert_batch(
        &self,
        drafts: Vec<MemoryDraft>,
    ) -> std::result::Result<Vec<MemoryRecord>, BatchUpsertError> {
        let records: Vec<MemoryRecord> = drafts
            .into_iter()
            .map(Self::draft_to_record)
            .collect::<Result<_>>()
            .map_err(|source| BatchUpsertError {
                stored: Vec::new(),
                source,
            })?;

        let texts: Vec<String> = records.iter().map(|r| r.embedding_text()).collect();
        let embeddings = self
            .embeddings
            .embed_passages(texts)
            .await
            .map_err(|source| BatchUpsertError {
                stored: Vec::new(),
                source,
            })?;

        let mut stored = Vec::with_capacity(records.len());
        for (record, embedding) in records.iter().zip(embeddings.iter()) {
            let result = async {
                let conn = self.db.connect()?;
                MemoryRepository::upsert(&conn, record, embedding).await
            }
            .await;

            if let Err(source) = result {
                return Err(BatchUpsertError {
                    stored: stored.iter().map(|r: &MemoryRecord| r.id.clone()).collect(),
                    source,
                });
            }
            stored.push(record.clone());
        }

        tracing::debug!(count = stored.len(), "Stored memory batch");
        Ok(stored)
    }

    /// Top-k similarity query restricted to the filter conjunction.
    /// Read-only: stored records are never touched.
    pub async fn query(
        &self,
        text: &str,
        filters: &MemoryFilters,
        top_k: u32,
    ) -> Result<Vec<RankedMemory>> {
        let embedding = self.embeddings.embed_query(text).await?;
        let conn = self.db.connect()?;
        MemoryRepository::search_similar(&conn, &embedding, top_k, filters).await
    }

    /// Remove a record by ID; returns whether it existed. Idempotent.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.db.connect()?;
        MemoryRepository::delete(&conn, id).await
    }

    /// Full index reset. Returns the number of records removed.
    pub async fn reset(&self) -> Result<u64> {
        let conn = self.db.connect()?;
        let removed = MemoryRepository::reset(&conn).await?;
        MetadataRepository::set_embedding_dimensions(&conn, self.embeddings.dimensions()).await?;
        tracing::info!(removed, "Memory index reset");
        Ok(removed)
    }

    pub async fn count(&self) -> Result<u64> {
        let conn = self.db.connect()?;
        MemoryRepository::count(&conn).await
    }

    fn draft_to_record(draft: MemoryDraft) -> Result<MemoryRecord> {
        let summary = draft.summary.trim().to_string();
        if summary.is_empty() {
            return Err(CuratorError::Validation(
                "Memory summary must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        Ok(MemoryRecord {
            id: draft.id.unwrap_or_else(|| nanoid!()),
            summary,
            details: draft.details.trim().to_string(),
            author_id: draft.author_id,
            conversation_id: draft.conversation_id,
            thread_id: draft.thread_id,
            status: draft.status,
            category: draft.category,
            created_at: now,
            updated_at: now,
        })
    }
}
