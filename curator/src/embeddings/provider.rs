use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};

use crate::config::EmbeddingsConfig;
use crate::error::{CuratorError, Result};

/// Local embedding model behind a blocking-thread boundary.
///
/// fastembed inference is CPU-bound and synchronous, so every call runs
/// under `spawn_blocking`. Queries and passages get the asymmetric
/// prefixes the BGE/nomic model families expect.
pub struct EmbeddingProvider {
    model: Arc<Mutex<TextEmbedding>>,
    batch_size: usize,
    dimensions: usize,
}

impl EmbeddingProvider {
    pub fn new(config: &EmbeddingsConfig) -> Result<Self> {
        let model_name = config
            .model
            .strip_prefix("local/")
            .unwrap_or(&config.model);
        let embedding_model = resolve_embedding_model(model_name);
        let model = TextEmbedding::try_new(
            InitOptions::new(embedding_model).with_show_download_progress(true),
        )
        .map_err(|e| CuratorError::Embedding(e.to_string()))?;

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            batch_size: config.batch_size.clamp(1, 256),
            dimensions: config.dimensions,
        })
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|e| CuratorError::Embedding(format!("Embedding model lock poisoned: {e}")))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| CuratorError::Embedding(e.to_string()))
        })
        .await
        .map_err(|e| CuratorError::Embedding(format!("Embedding worker failed: {e}")))?
    }

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed(vec![text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| CuratorError::Embedding("No embedding generated".to_string()))
    }

    /// Embed a retrieval query.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embed_single(&format!("query: {query}")).await
    }

    /// Embed a single stored passage.
    pub async fn embed_passage(&self, passage: &str) -> Result<Vec<f32>> {
        self.embed_single(&format!("passage: {passage}")).await
    }

    /// Embed many passages in one model pass.
    pub async fn embed_passages(&self, passages: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let prefixed: Vec<String> = passages
            .into_iter()
            .map(|p| format!("passage: {p}"))
            .collect();
        self.embed(prefixed).await
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}

impl Clone for EmbeddingProvider {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
            batch_size: self.batch_size,
            dimensions: self.dimensions,
        }
    }
}

fn resolve_embedding_model(model_name: &str) -> EmbeddingModel {
    match model_name {
        "BAAI/bge-small-en-v1.5" | "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
        "BAAI/bge-base-en-v1.5" | "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
        "BAAI/bge-large-en-v1.5" | "bge-large-en-v1.5" => EmbeddingModel::BGELargeENV15,
        "all-MiniLM-L6-v2" | "sentence-transformers/all-MiniLM-L6-v2" => {
            EmbeddingModel::AllMiniLML6V2
        }
        "all-MiniLM-L12-v2" | "sentence-transformers/all-MiniLM-L12-v2" => {
            EmbeddingModel::AllMiniLML12V2
        }
        "nomic-embed-text-v1" | "nomic-ai/nomic-embed-text-v1" => EmbeddingModel::NomicEmbedTextV1,
        "nomic-embed-text-v1.5" | "nomic-ai/nomic-embed-text-v1.5" => {
            EmbeddingModel::NomicEmbedTextV15
        }
        _ => EmbeddingModel::BGESmallENV15,
    }
}
