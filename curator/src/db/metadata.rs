use libsql::{params, Connection};

use crate::error::Result;

const EMBEDDING_DIMENSIONS_KEY: &str = "embedding_dimensions";

pub struct MetadataRepository;

impl MetadataRepository {
    pub async fn get_embedding_dimensions(conn: &Connection) -> Result<Option<usize>> {
        let mut rows = conn
            .query(
                "SELECT value FROM index_meta WHERE key = ?1",
                params![EMBEDDING_DIMENSIONS_KEY],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row.get::<String>(0)?.parse::<usize>().ok()),
            None => Ok(None),
        }
    }

    pub async fn set_embedding_dimensions(conn: &Connection, dims: usize) -> Result<()> {
        conn.execute(
            "INSERT INTO index_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![EMBEDDING_DIMENSIONS_KEY, dims.to_string()],
        )
        .await?;
        Ok(())
    }
}
