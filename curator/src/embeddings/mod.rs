mod provider;

use async_trait::async_trait;

use crate::error::Result;

pub use provider::EmbeddingProvider;

/// Text-to-vector boundary.
///
/// Implementations are deterministic enough to cache by content hash but
/// are not required to be deterministic. Query and passage embedding are
/// separate because asymmetric models prefix them differently.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>>;
    async fn embed_passage(&self, passage: &str) -> Result<Vec<f32>>;
    async fn embed_passages(&self, passages: Vec<String>) -> Result<Vec<Vec<f32>>>;
    fn dimensions(&self) -> usize;
}

#[async_trait]
impl Embedder for EmbeddingProvider {
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        EmbeddingProvider::embed_query(self, query).await
    }

    async fn embed_passage(&self, passage: &str) -> Result<Vec<f32>> {
        EmbeddingProvider::embed_passage(self, passage).await
    }

    async fn embed_passages(&self, passages: Vec<String>) -> Result<Vec<Vec<f32>>> {
        EmbeddingProvider::embed_passages(self, passages).await
    }

    fn dimensions(&self) -> usize {
        EmbeddingProvider::dimensions(self)
    }
}
