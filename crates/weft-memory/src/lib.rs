pub mod embeddings;
pub mod gateway;
pub mod store;

pub use embeddings::{create_provider, EmbeddingProvider, GeminiEmbeddingProvider, HttpEmbeddingProvider};
pub use gateway::VectorMemory;
pub use store::SqliteMemory;
