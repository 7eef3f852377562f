use libsql::Connection;

use crate::error::Result;

pub async fn init_schema(conn: &Connection, embedding_dimensions: usize) -> Result<()> {
    let schema = format!(
        r#"
        -- Memories table with vector embedding
        CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            summary TEXT NOT NULL,
            details TEXT NOT NULL DEFAULT '',
            author_id TEXT,
            conversation_id TEXT,
            thread_id TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            category TEXT NOT NULL DEFAULT 'general',
            embedding F32_BLOB({embedding_dimensions}),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_memories_author_id ON memories(author_id);
        CREATE INDEX IF NOT EXISTS idx_memories_conversation_id ON memories(conversation_id);
        CREATE INDEX IF NOT EXISTS idx_memories_thread_id ON memories(thread_id);
        CREATE INDEX IF NOT EXISTS idx_memories_status ON memories(status);
        CREATE INDEX IF NOT EXISTS idx_memories_category ON memories(category);

        -- Index-level metadata (e.g. embedding dimensions)
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#
    );

    conn.execute_batch(&schema).await?;
    Ok(())
}
