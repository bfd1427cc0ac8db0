use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use weft_core::config::ModelConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::GenerativeGateway;
use weft_core::types::{parse_json_output, Completion, CompletionMode};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini native API client.
pub struct GeminiClient {
    http: Client,
    config: ModelConfig,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: ModelConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| WeftError::Config("Gemini: api_key is required".into()))?;
        Ok(Self {
            http: Client::new(),
            config,
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            base, self.config.model_id, self.api_key
        )
    }
}

// ── Request types ────────────────────────────────────────────────

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize, Debug)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize, Debug)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(rename = "responseMimeType", skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

// ── Response types ───────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize, Debug)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

fn build_request(prompt: &str, mode: CompletionMode, config: &ModelConfig) -> GeminiRequest {
    GeminiRequest {
        contents: vec![GeminiContent {
            role: Some("user".to_string()),
            parts: vec![GeminiPart {
                text: prompt.to_string(),
            }],
        }],
        generation_config: GenerationConfig {
            max_output_tokens: config.max_tokens,
            temperature: if config.temperature > 0.0 {
                Some(config.temperature)
            } else {
                None
            },
            response_mime_type: match mode {
                CompletionMode::Json => Some("application/json"),
                CompletionMode::Text => None,
            },
        },
    }
}

/// Concatenate the text parts of the first candidate.
fn extract_text(response: GeminiResponse) -> Option<String> {
    let content = response.candidates.into_iter().next()?.content?;
    let text: String = content.parts.into_iter().map(|p| p.text).collect();
    Some(text)
}

impl GenerativeGateway for GeminiClient {
    fn complete(&self, prompt: &str, mode: CompletionMode) -> BoxFuture<'_, Result<Completion>> {
        let body = build_request(prompt, mode, &self.config);

        Box::pin(async move {
            let response = self
                .http
                .post(self.endpoint())
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
                .map_err(|e| WeftError::service("gemini", e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(WeftError::service(
                    "gemini",
                    format!("HTTP {}: {}", status, body),
                ));
            }

            let parsed: GeminiResponse = response
                .json()
                .await
                .map_err(|e| WeftError::service("gemini", e.to_string()))?;

            let text = extract_text(parsed)
                .ok_or_else(|| WeftError::service("gemini", "response had no candidates"))?;
            debug!(model = %self.config.model_id, chars = text.len(), "Gemini completion received");

            match mode {
                CompletionMode::Text => Ok(Completion::Text(text)),
                CompletionMode::Json => parse_json_output(&text).map(Completion::Json),
            }
        })
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
