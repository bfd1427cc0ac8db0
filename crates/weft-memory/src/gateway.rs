use futures::future::BoxFuture;
use tracing::debug;

use weft_core::config::MemoryConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::MemoryGateway;
use weft_core::types::MemoryHit;

use crate::embeddings::EmbeddingProvider;
use crate::store::SqliteMemory;

/// Similarity memory: embeds text with an `EmbeddingProvider` and stores
/// or searches vectors in a `SqliteMemory`.
pub struct VectorMemory {
    provider: Box<dyn EmbeddingProvider>,
    store: SqliteMemory,
    match_threshold: f32,
    match_count: usize,
}

impl VectorMemory {
    pub fn new(provider: Box<dyn EmbeddingProvider>, store: SqliteMemory, config: &MemoryConfig) -> Self {
        Self {
            provider,
            store,
            match_threshold: config.match_threshold,
            match_count: config.match_count,
        }
    }

    pub fn store(&self) -> &SqliteMemory {
        &self.store
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.provider
            .embed(text)
            .await
            .map_err(|e| WeftError::service("embedding", e))
    }
}

impl MemoryGateway for VectorMemory {
    fn recall(&self, query: &str) -> BoxFuture<'_, Result<Vec<MemoryHit>>> {
        let query = query.to_string();
        Box::pin(async move {
            let vector = self.embed(&query).await?;
            let hits = self
                .store
                .search_similar(&vector, self.match_threshold, self.match_count)?;
            debug!(hits = hits.len(), "Memory recall complete");
            Ok(hits)
        })
    }

    fn save(&self, content: &str, metadata: serde_json::Value) -> BoxFuture<'_, Result<()>> {
        let content = content.to_string();
        Box::pin(async move {
            let vector = self.embed(&content).await?;
            let id = self.store.insert(&content, &metadata, &vector)?;
            debug!(document_id = id, "Memory document saved");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Embeds by counting a few marker words; deterministic and offline.
    struct KeywordEmbedder;

    impl EmbeddingProvider for KeywordEmbedder {
        fn embed(&self, text: &str) -> BoxFuture<'_, std::result::Result<Vec<f32>, String>> {
            let lower = text.to_lowercase();
            let v = ["invoice", "appointment", "urgent"]
                .iter()
                .map(|w| lower.matches(w).count() as f32)
                .collect();
            Box::pin(async move { Ok(v) })
        }

        fn dimensions(&self) -> usize {
            3
        }
    }

    struct BrokenEmbedder;

    impl EmbeddingProvider for BrokenEmbedder {
        fn embed(&self, _text: &str) -> BoxFuture<'_, std::result::Result<Vec<f32>, String>> {
            Box::pin(async { Err("connection refused".to_string()) })
        }

        fn dimensions(&self) -> usize {
            3
        }
    }

    fn memory(provider: Box<dyn EmbeddingProvider>) -> VectorMemory {
        VectorMemory::new(provider, SqliteMemory::in_memory().unwrap(), &MemoryConfig::default())
    }

    #[tokio::test]
    async fn test_save_then_recall_similar() {
        let mem = memory(Box::new(KeywordEmbedder));
        mem.save("Question about my invoice", serde_json::json!({"trace_id": "a"}))
            .await
            .unwrap();
        mem.save("Book an appointment please", serde_json::json!({"trace_id": "b"}))
            .await
            .unwrap();

        let hits = mem.recall("invoice is wrong").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "Question about my invoice");
        assert_eq!(hits[0].metadata["trace_id"], "a");
    }

    #[tokio::test]
    async fn test_recall_empty_store() {
        let mem = memory(Box::new(KeywordEmbedder));
        assert!(mem.recall("invoice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_is_service_error() {
        let mem = memory(Box::new(BrokenEmbedder));
        let err = mem.recall("anything").await.unwrap_err();
        assert!(matches!(err, WeftError::ExternalService { .. }));
        assert!(mem.save("x", serde_json::Value::Null).await.is_err());
        assert_eq!(mem.store().count().unwrap(), 0);
    }
}
