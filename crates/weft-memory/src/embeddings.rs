use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use weft_core::config::EmbeddingConfig;

/// Trait for embedding providers.
pub trait EmbeddingProvider: Send + Sync + 'static {
    /// Embed a single text into a vector.
    fn embed(&self, text: &str) -> BoxFuture<'_, Result<Vec<f32>, String>>;
    /// Number of dimensions in the embedding vectors.
    fn dimensions(&self) -> usize;
}

/// Create an embedding provider from config.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>, String> {
    match config.provider.as_str() {
        "gemini" | "google" => {
            let key = config
                .api_key
                .as_deref()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| "Gemini embeddings: api_key is required".to_string())?;
            Ok(Box::new(GeminiEmbeddingProvider::new(
                config.base_url.as_deref(),
                key,
                &config.model,
                config.dimensions,
            )))
        }
        _ => {
            let base_url = config
                .base_url
                .as_deref()
                .unwrap_or("https://api.openai.com/v1");
            Ok(Box::new(HttpEmbeddingProvider::new(
                base_url,
                config.api_key.as_deref(),
                &config.model,
                config.dimensions,
            )))
        }
    }
}

/// HTTP-based embedding provider compatible with OpenAI, Ollama, etc.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dims: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(base_url: &str, api_key: Option<&str>, model: &str, dims: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(String::from),
            model: model.to_string(),
            dims,
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn embed(&self, text: &str) -> BoxFuture<'_, Result<Vec<f32>, String>> {
        let text = text.to_string();
        Box::pin(async move {
            let url = format!("{}/embeddings", self.base_url);

            let mut req = self.client.post(&url).json(&EmbeddingRequest {
                model: self.model.clone(),
                input: vec![text],
            });

            if let Some(ref key) = self.api_key {
                req = req.bearer_auth(key);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| format!("Embedding request failed: {}", e))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(format!("Embedding API error {}: {}", status, body));
            }

            let body: EmbeddingResponse = resp
                .json()
                .await
                .map_err(|e| format!("Failed to parse embedding response: {}", e))?;

            body.data
                .into_iter()
                .next()
                .map(|d| d.embedding)
                .ok_or_else(|| "Embedding response was empty".to_string())
        })
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Google `embedContent` provider (e.g. `text-embedding-004`).
pub struct GeminiEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl GeminiEmbeddingProvider {
    pub fn new(base_url: Option<&str>, api_key: &str, model: &str, dims: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url
                .unwrap_or("https://generativelanguage.googleapis.com")
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            dims,
        }
    }
}

#[derive(Serialize)]
struct GeminiEmbedRequest {
    content: GeminiEmbedContent,
}

#[derive(Serialize)]
struct GeminiEmbedContent {
    parts: Vec<GeminiEmbedPart>,
}

#[derive(Serialize)]
struct GeminiEmbedPart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiEmbedResponse {
    embedding: GeminiEmbedValues,
}

#[derive(Deserialize)]
struct GeminiEmbedValues {
    values: Vec<f32>,
}

impl EmbeddingProvider for GeminiEmbeddingProvider {
    fn embed(&self, text: &str) -> BoxFuture<'_, Result<Vec<f32>, String>> {
        let text = text.to_string();
        Box::pin(async move {
            let url = format!(
                "{}/v1beta/models/{}:embedContent?key={}",
                self.base_url, self.model, self.api_key
            );

            let resp = self
                .client
                .post(&url)
                .json(&GeminiEmbedRequest {
                    content: GeminiEmbedContent {
                        parts: vec![GeminiEmbedPart { text }],
                    },
                })
                .send()
                .await
                .map_err(|e| format!("Embedding request failed: {}", e))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(format!("Embedding API error {}: {}", status, body));
            }

            let body: GeminiEmbedResponse = resp
                .json()
                .await
                .map_err(|e| format!("Failed to parse embedding response: {}", e))?;

            Ok(body.embedding.values)
        })
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[1.0, 0.0, 0.0]);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_mismatched_dims() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_gemini_provider_requires_key() {
        let config: EmbeddingConfig = serde_json::from_value(serde_json::json!({
            "provider": "gemini",
            "model": "text-embedding-004"
        }))
        .unwrap();
        assert!(create_provider(&config).is_err());
    }

    #[test]
    fn test_openai_compatible_provider_without_key() {
        let config: EmbeddingConfig = serde_json::from_value(serde_json::json!({
            "provider": "ollama",
            "model": "nomic-embed-text",
            "base_url": "http://localhost:11434/v1/",
            "dimensions": 768
        }))
        .unwrap();
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.dimensions(), 768);
    }

    #[test]
    fn test_gemini_request_shape() {
        let req = GeminiEmbedRequest {
            content: GeminiEmbedContent {
                parts: vec![GeminiEmbedPart { text: "Bonjour".into() }],
            },
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["content"]["parts"][0]["text"], "Bonjour");
    }
}
