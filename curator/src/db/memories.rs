use chrono::{DateTime, Utc};
use libsql::{params, Connection};

use crate::error::Result;
use crate::models::{MemoryFilters, MemoryRecord, RankedMemory};

const RECORD_COLUMNS: &str = "id, summary, details, author_id, conversation_id, thread_id, \
                              status, category, created_at, updated_at";

pub struct MemoryRepository;

impl MemoryRepository {
    /// Insert or fully replace a record, embedding included.
    ///
    /// Last writer wins for a given id; per-key atomicity comes from the
    /// backing store, so concurrent upserts of distinct ids are safe.
    pub async fn upsert(
        conn: &Connection,
        record: &MemoryRecord,
        embedding: &[f32],
    ) -> Result<()> {
        let embedding_json = serde_json::to_string(embedding)?;

        conn.execute(
            r#"
            INSERT INTO memories (
                id, summary, details, author_id, conversation_id, thread_id,
                status, category, embedding, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, vector32(?9), ?10, ?11
            )
            ON CONFLICT(id) DO UPDATE SET
                summary = excluded.summary,
                details = excluded.details,
                author_id = excluded.author_id,
                conversation_id = excluded.conversation_id,
                thread_id = excluded.thread_id,
                status = excluded.status,
                category = excluded.category,
                embedding = excluded.embedding,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
            "#,
            params![
                record.id.clone(),
                record.summary.clone(),
                record.details.clone(),
                record.author_id.clone(),
                record.conversation_id.clone(),
                record.thread_id.clone(),
                record.status.to_string(),
                record.category.to_string(),
                embedding_json,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )
        .await?;

        Ok(())
    }

    pub async fn get_by_id(conn: &Connection, id: &str) -> Result<Option<MemoryRecord>> {
        let mut rows = conn
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM memories WHERE id = ?1"),
                params![id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    /// Remove a record. Returns whether it existed.
    pub async fn delete(conn: &Connection, id: &str) -> Result<bool> {
        let affected = conn
            .execute("DELETE FROM memories WHERE id = ?1", params![id])
            .await?;
        Ok(affected > 0)
    }

    /// Similarity query against stored embeddings.
    ///
    /// Score is `1 - vector_distance_cos`, so results come back ordered
    /// most-relevant first. Filters are a conjunction; NULL-bound
    /// parameters impose no restriction. Read-only.
    pub async fn search_similar(
        conn: &Connection,
        embedding: &[f32],
        top_k: u32,
        filters: &MemoryFilters,
    ) -> Result<Vec<RankedMemory>> {
        let embedding_json = serde_json::to_string(embedding)?;

        let query = format!(
            r#"
            SELECT {RECORD_COLUMNS},
                   1 - vector_distance_cos(embedding, vector32(?1)) AS score
            FROM memories
            WHERE embedding IS NOT NULL
              AND (?2 IS NULL OR author_id = ?2)
              AND (?3 IS NULL OR conversation_id = ?3)
              AND (?4 IS NULL OR thread_id = ?4)
              AND (?5 IS NULL OR status = ?5)
              AND (?6 IS NULL OR category = ?6)
            ORDER BY score DESC
            LIMIT ?7
            "#
        );

        let mut rows = conn
            .query(
                &query,
                params![
                    embedding_json,
                    filters.author_id.clone(),
                    filters.conversation_id.clone(),
                    filters.thread_id.clone(),
                    filters.status.map(|s| s.to_string()),
                    filters.category.map(|c| c.to_string()),
                    top_k as i64,
                ],
            )
            .await?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await? {
            let record = Self::row_to_record(&row)?;
            let score = row.get::<f64>(10)? as f32;
            results.push(RankedMemory { record, score });
        }

        Ok(results)
    }

    /// Wipe every record. Returns how many were removed.
    pub async fn reset(conn: &Connection) -> Result<u64> {
        let affected = conn.execute("DELETE FROM memories", ()).await?;
        Ok(affected)
    }

    pub async fn count(conn: &Connection) -> Result<u64> {
        let mut rows = conn.query("SELECT COUNT(*) FROM memories", ()).await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)? as u64),
            None => Ok(0),
        }
    }

    fn row_to_record(row: &libsql::Row) -> Result<MemoryRecord> {
        Ok(MemoryRecord {
            id: row.get(0)?,
            summary: row.get(1)?,
            details: row.get(2)?,
            author_id: row.get(3)?,
            conversation_id: row.get(4)?,
            thread_id: row.get(5)?,
            status: row.get::<String>(6)?.parse().unwrap_or_default(),
            category: row.get::<String>(7)?.parse().unwrap_or_default(),
            created_at: DateTime::parse_from_rfc3339(&row.get::<String>(8)?)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            updated_at: DateTime::parse_from_rfc3339(&row.get::<String>(9)?)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use crate::models::{MemoryCategory, MemoryStatus};

    async fn setup_test_db() -> Connection {
        let conn = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap()
            .connect()
            .unwrap();
        schema::init_schema(&conn, 4).await.unwrap();
        conn
    }

    fn record(id: &str, summary: &str) -> MemoryRecord {
        let now = Utc::now();
        MemoryRecord {
            id: id.to_string(),
            summary: summary.to_string(),
            details: String::new(),
            author_id: Some("U1".to_string()),
            conversation_id: Some("C1".to_string()),
            thread_id: None,
            status: MemoryStatus::Active,
            category: MemoryCategory::General,
            created_at: now,
            updated_at: now,
        }
    }

    /// Unit vector along one of the four test axes.
    fn axis(i: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; 4];
        v[i] = 1.0;
        v
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let conn = setup_test_db().await;

        MemoryRepository::upsert(&conn, &record("m1", "First memory"), &axis(0))
            .await
            .unwrap();

        let fetched = MemoryRepository::get_by_id(&conn, "m1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.summary, "First memory");
        assert_eq!(fetched.author_id.as_deref(), Some("U1"));
        assert_eq!(fetched.status, MemoryStatus::Active);
    }

    #[tokio::test]
    async fn test_upsert_same_id_replaces_record() {
        let conn = setup_test_db().await;

        MemoryRepository::upsert(&conn, &record("m1", "Original"), &axis(0))
            .await
            .unwrap();

        let mut updated = record("m1", "Replaced");
        updated.status = MemoryStatus::Completed;
        MemoryRepository::upsert(&conn, &updated, &axis(1))
            .await
            .unwrap();

        assert_eq!(MemoryRepository::count(&conn).await.unwrap(), 1);
        let fetched = MemoryRepository::get_by_id(&conn, "m1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.summary, "Replaced");
        assert_eq!(fetched.status, MemoryStatus::Completed);

        // The replacement's embedding is live: m1 now matches axis 1.
        let hits = MemoryRepository::search_similar(&conn, &axis(1), 10, &MemoryFilters::default())
            .await
            .unwrap();
        assert_eq!(hits[0].record.id, "m1");
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let conn = setup_test_db().await;

        MemoryRepository::upsert(&conn, &record("m1", "To delete"), &axis(0))
            .await
            .unwrap();

        assert!(MemoryRepository::delete(&conn, "m1").await.unwrap());
        assert!(!MemoryRepository::delete(&conn, "m1").await.unwrap());
        assert!(MemoryRepository::get_by_id(&conn, "m1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_search_orders_by_descending_score() {
        let conn = setup_test_db().await;

        MemoryRepository::upsert(&conn, &record("far", "Unrelated"), &axis(1))
            .await
            .unwrap();
        MemoryRepository::upsert(&conn, &record("near", "On topic"), &axis(0))
            .await
            .unwrap();
        MemoryRepository::upsert(
            &conn,
            &record("mid", "Somewhat related"),
            &[0.7071, 0.7071, 0.0, 0.0],
        )
        .await
        .unwrap();

        let hits = MemoryRepository::search_similar(&conn, &axis(0), 10, &MemoryFilters::default())
            .await
            .unwrap();

        let ids: Vec<&str> = hits.iter().map(|h| h.record.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_search_respects_top_k() {
        let conn = setup_test_db().await;

        for i in 0..5 {
            MemoryRepository::upsert(&conn, &record(&format!("m{i}"), "Entry"), &axis(0))
                .await
                .unwrap();
        }

        let hits = MemoryRepository::search_similar(&conn, &axis(0), 2, &MemoryFilters::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_search_filters_are_a_conjunction() {
        let conn = setup_test_db().await;

        let mut alice = record("alice-task", "Ship the release");
        alice.author_id = Some("U_ALICE".to_string());
        alice.category = MemoryCategory::Task;
        MemoryRepository::upsert(&conn, &alice, &axis(0)).await.unwrap();

        let mut bob = record("bob-task", "Ship the release notes");
        bob.author_id = Some("U_BOB".to_string());
        bob.category = MemoryCategory::Task;
        MemoryRepository::upsert(&conn, &bob, &axis(0)).await.unwrap();

        let mut alice_fact = record("alice-fact", "Release day is Friday");
        alice_fact.author_id = Some("U_ALICE".to_string());
        alice_fact.category = MemoryCategory::Fact;
        MemoryRepository::upsert(&conn, &alice_fact, &axis(0))
            .await
            .unwrap();

        let filters = MemoryFilters {
            author_id: Some("U_ALICE".to_string()),
            category: Some(MemoryCategory::Task),
            ..Default::default()
        };
        let hits = MemoryRepository::search_similar(&conn, &axis(0), 10, &filters)
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, "alice-task");
    }

    #[tokio::test]
    async fn test_search_status_filter() {
        let conn = setup_test_db().await;

        let mut done = record("done", "Fixed the login bug");
        done.status = MemoryStatus::Completed;
        MemoryRepository::upsert(&conn, &done, &axis(0)).await.unwrap();

        let open = record("open", "Fix the signup bug");
        MemoryRepository::upsert(&conn, &open, &axis(0)).await.unwrap();

        let filters = MemoryFilters {
            status: Some(MemoryStatus::Active),
            ..Default::default()
        };
        let hits = MemoryRepository::search_similar(&conn, &axis(0), 10, &filters)
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, "open");
    }

    #[tokio::test]
    async fn test_reset_wipes_everything() {
        let conn = setup_test_db().await;

        for i in 0..3 {
            MemoryRepository::upsert(&conn, &record(&format!("m{i}"), "Entry"), &axis(0))
                .await
                .unwrap();
        }

        let removed = MemoryRepository::reset(&conn).await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(MemoryRepository::count(&conn).await.unwrap(), 0);
    }
}
