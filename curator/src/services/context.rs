use std::sync::Arc;

use crate::config::ContextConfig;
use crate::models::{MemoryFilters, MemoryStatus, RankedMemory};
use crate::services::MemoryService;

const HEADER: &str = "## Relevant memories\n\n";
const EMPTY_NOTICE: &str = "No relevant memories found.\n";
const TRUNCATION_MARKER: &str = "- ... (more memories available)\n";

/// The bounded context block handed to the response generator, plus the
/// entries that actually made it in (for provenance).
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub block: String,
    pub included: Vec<RankedMemory>,
}

impl AssembledContext {
    fn empty() -> Self {
        Self {
            block: format!("{HEADER}{EMPTY_NOTICE}"),
            included: Vec::new(),
        }
    }
}

/// Turns a query into a budget-bounded, score-ordered context block.
pub struct ContextAssembler {
    memory: Arc<MemoryService>,
    budget_chars: usize,
    top_k: u32,
}

impl ContextAssembler {
    pub fn new(memory: Arc<MemoryService>, config: &ContextConfig) -> Self {
        Self {
            memory,
            budget_chars: config.budget_chars,
            top_k: config.top_k,
        }
    }

    /// Retrieve and format memories for `query_text` under the
    /// configured budget.
    pub async fn assemble(&self, query_text: &str, filters: &MemoryFilters) -> AssembledContext {
        self.assemble_with_budget(query_text, filters, self.budget_chars)
            .await
    }

    /// Retrieve and format memories for `query_text`, appending entries
    /// in descending-score order until the next one would exceed
    /// `budget_chars`.
    ///
    /// Never fails: an unreachable memory backend degrades to the empty
    /// block with a warning so reply generation is not blocked.
    pub async fn assemble_with_budget(
        &self,
        query_text: &str,
        filters: &MemoryFilters,
        budget_chars: usize,
    ) -> AssembledContext {
        let ranked = match self.memory.query(query_text, filters, self.top_k).await {
            Ok(ranked) => ranked,
            Err(error) => {
                tracing::warn!(%error, "Memory retrieval failed; continuing without context");
                return AssembledContext::empty();
            }
        };

        if ranked.is_empty() {
            return AssembledContext::empty();
        }

        let mut block = String::from(HEADER);
        let mut included = Vec::new();

        for entry in ranked {
            let line = format_entry(&entry);
            if block.len() + line.len() > budget_chars {
                block.push_str(TRUNCATION_MARKER);
                break;
            }
            block.push_str(&line);
            included.push(entry);
        }

        if included.is_empty() {
            // Budget too small for even one entry; still say something.
            return AssembledContext::empty();
        }

        AssembledContext { block, included }
    }
}

fn format_entry(entry: &RankedMemory) -> String {
    let record = &entry.record;
    let mut line = format!(
        "- [{}] {} ({:.0}% match",
        record.category,
        record.summary,
        (entry.score * 100.0).clamp(0.0, 100.0)
    );
    if record.status != MemoryStatus::Active {
        line.push_str(&format!(", {}", record.status));
    }
    if let Some(author) = &record.author_id {
        line.push_str(&format!(", from <@{author}>"));
    }
    line.push_str(")\n");

    if !record.details.is_empty() {
        line.push_str(&format!("  {}\n", record.details));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::Database;
    use crate::embeddings::testing::StubEmbedder;
    use crate::models::{MemoryCategory, MemoryDraft};

    const DIMS: usize = 8;

    async fn setup_memory() -> Arc<MemoryService> {
        // `MemoryService` opens a fresh connection per operation; a libsql
        // `:memory:` db is isolated per connection, so back the tests with a
        // unique temp file where every connection shares state.
        let path = std::env::temp_dir().join(format!("curator-test-{}.db", nanoid::nanoid!()));
        let config = DatabaseConfig {
            url: format!("file:{}", path.display()),
            auth_token: None,
            local_path: None,
        };
        let db = Database::new(&config, DIMS).await.unwrap();
        Arc::new(MemoryService::new(db, Arc::new(StubEmbedder { dims: DIMS })))
    }

    fn assembler(memory: Arc<MemoryService>, budget_chars: usize) -> ContextAssembler {
        ContextAssembler::new(
            memory,
            &ContextConfig {
                budget_chars,
                top_k: 5,
            },
        )
    }

    fn draft(summary: &str) -> MemoryDraft {
        MemoryDraft {
            summary: summary.to_string(),
            author_id: Some("U1".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_empty_index_produces_no_memories_block() {
        let memory = setup_memory().await;
        let assembler = assembler(memory, 2000);

        let context = assembler
            .assemble("anything", &MemoryFilters::default())
            .await;

        assert!(context.block.contains("No relevant memories found"));
        assert!(!context.block.is_empty());
        assert!(context.included.is_empty());
    }

    #[tokio::test]
    async fn test_entries_formatted_with_score_percentage() {
        let memory = setup_memory().await;
        let mut entry = draft("User prefers dark mode");
        entry.category = MemoryCategory::Preference;
        memory.upsert(entry).await.unwrap();

        let assembler = assembler(memory, 2000);
        let context = assembler
            .assemble("dark mode", &MemoryFilters::default())
            .await;

        assert_eq!(context.included.len(), 1);
        assert!(context.block.contains("[preference] User prefers dark mode"));
        assert!(context.block.contains("% match"));
        assert!(context.block.contains("from <@U1>"));
        assert!(!context.block.contains("more memories available"));
    }

    #[tokio::test]
    async fn test_budget_truncates_with_marker() {
        let memory = setup_memory().await;
        for i in 0..5 {
            memory
                .upsert(draft(&format!(
                    "A reasonably long memory entry number {i} about deployment workflows"
                )))
                .await
                .unwrap();
        }

        // Budget fits the header plus roughly one entry.
        let assembler = assembler(memory, 140);
        let context = assembler
            .assemble("deployment", &MemoryFilters::default())
            .await;

        assert!(context.block.contains("more memories available"));
        assert!(!context.included.is_empty());
        assert!(context.included.len() < 5);
    }

    #[tokio::test]
    async fn test_budget_too_small_for_any_entry_degrades_to_empty() {
        let memory = setup_memory().await;
        memory.upsert(draft("Something stored")).await.unwrap();

        let assembler = assembler(memory, 10);
        let context = assembler
            .assemble("anything", &MemoryFilters::default())
            .await;

        assert!(context.block.contains("No relevant memories found"));
        assert!(context.included.is_empty());
    }

    #[tokio::test]
    async fn test_included_matches_block_order() {
        let memory = setup_memory().await;
        memory.upsert(draft("First entry")).await.unwrap();
        memory.upsert(draft("Second entry")).await.unwrap();

        let assembler = assembler(memory, 2000);
        let context = assembler.assemble("entry", &MemoryFilters::default()).await;

        assert_eq!(context.included.len(), 2);
        // Block lists entries in the same descending-score order.
        let first_pos = context
            .block
            .find(&context.included[0].record.summary)
            .unwrap();
        let second_pos = context
            .block
            .find(&context.included[1].record.summary)
            .unwrap();
        assert!(first_pos < second_pos);
        assert!(context.included[0].score >= context.included[1].score);
    }
}
