use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};

/// Top-level Weft configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Generative model. Absent = generative gateway unconfigured.
    #[serde(default)]
    pub model: Option<ModelConfig>,
    /// Embedding model for similarity memory. Absent = memory unconfigured.
    #[serde(default)]
    pub embedding: Option<EmbeddingConfig>,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub replies: ReplyConfig,
    /// Shell hooks per action name, run when an `action` node fires.
    #[serde(default)]
    pub actions: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_provider() -> String { "gemini".to_string() }
fn default_model_id() -> String { "gemini-2.0-flash".to_string() }
fn default_max_tokens() -> u32 { 2048 }
fn default_temperature() -> f32 { 0.0 }

/// Retry configuration for generative requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 2 }
fn default_initial_backoff() -> u64 { 500 }
fn default_max_backoff() -> u64 { 8000 }

/// Embedding model configuration for similarity memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider name: "gemini", or any OpenAI-compatible API ("openai", "ollama", ...).
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model name (e.g., "text-embedding-004", "nomic-embed-text").
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_embedding_dims")]
    pub dimensions: usize,
}

fn default_embedding_model() -> String { "text-embedding-004".to_string() }
fn default_embedding_dims() -> usize { 768 }

/// Similarity memory store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Minimum cosine similarity for a recalled document.
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,
    /// Maximum number of recalled documents.
    #[serde(default = "default_match_count")]
    pub match_count: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: default_db_path(),
            match_threshold: default_match_threshold(),
            match_count: default_match_count(),
        }
    }
}

fn default_true() -> bool { true }
fn default_db_path() -> String { "~/.weft/memory.db".to_string() }
fn default_match_threshold() -> f32 { 0.5 }
fn default_match_count() -> usize { 2 }

impl MemoryConfig {
    /// Resolve the database path (expand ~).
    pub fn db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }
}

/// Workflow engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Timeout applied to every generative or memory call.
    #[serde(default = "default_gateway_timeout")]
    pub gateway_timeout_secs: u64,
    /// Maximum node executions per run before the run is aborted.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// TOML workflow definition. Absent = built-in support triage workflow.
    #[serde(default)]
    pub workflow_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gateway_timeout_secs: default_gateway_timeout(),
            max_steps: default_max_steps(),
            workflow_path: None,
        }
    }
}

fn default_gateway_timeout() -> u64 { 30 }
fn default_max_steps() -> usize { 64 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token required on the webhook when set.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            token: None,
        }
    }
}

fn default_bind() -> String { "127.0.0.1:3000".to_string() }

/// Fixed strings used for degraded results and inbound replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyConfig {
    /// `generate` result when no generative gateway is configured.
    #[serde(default = "default_not_configured")]
    pub not_configured: String,
    /// `generate` result when the generative gateway fails.
    #[serde(default = "default_generation_failed")]
    pub generation_failed: String,
    /// Reply when an action node (escalation) fired and nothing was generated.
    #[serde(default = "default_escalation")]
    pub escalation: String,
    /// Reply when no terminal node produced output.
    #[serde(default = "default_received")]
    pub received: String,
    /// Reply when the run aborted.
    #[serde(default = "default_failure")]
    pub failure: String,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            not_configured: default_not_configured(),
            generation_failed: default_generation_failed(),
            escalation: default_escalation(),
            received: default_received(),
            failure: default_failure(),
        }
    }
}

fn default_not_configured() -> String { "AI not configured.".to_string() }
fn default_generation_failed() -> String { "The assistant is temporarily unavailable.".to_string() }
fn default_escalation() -> String { "A manager is on the way.".to_string() }
fn default_received() -> String { "Received.".to_string() }
fn default_failure() -> String { "Sorry, we could not process your message.".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WeftError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| WeftError::Config(e.to_string()))
    }

    /// Build a config from environment variables alone.
    ///
    /// `GEMINI_API_KEY` enables both the generative model and embeddings;
    /// `WEFT_BIND` (or `PORT`) selects the listen address.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            if !key.is_empty() {
                config.model = Some(ModelConfig {
                    provider: default_provider(),
                    model_id: std::env::var("WEFT_MODEL").unwrap_or_else(|_| default_model_id()),
                    api_key: Some(key.clone()),
                    base_url: None,
                    max_tokens: default_max_tokens(),
                    temperature: default_temperature(),
                    retry: Some(RetryConfig::default()),
                });
                config.embedding = Some(EmbeddingConfig {
                    provider: default_provider(),
                    model: default_embedding_model(),
                    base_url: None,
                    api_key: Some(key),
                    dimensions: default_embedding_dims(),
                });
            }
        }

        if let Ok(bind) = std::env::var("WEFT_BIND") {
            config.gateway.bind = bind;
        } else if let Ok(port) = std::env::var("PORT") {
            config.gateway.bind = format!("0.0.0.0:{}", port);
        }

        if let Ok(path) = std::env::var("WEFT_WORKFLOW") {
            config.engine.workflow_path = Some(path);
        }

        config
    }

    /// Whether recall/save can run: memory enabled and an embedding model present.
    pub fn memory_configured(&self) -> bool {
        self.memory.enabled && self.embedding.is_some()
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_WEFT_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_WEFT_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_WEFT_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_WEFT_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_WEFT_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert!(config.model.is_none());
        assert!(config.embedding.is_none());
        assert!(!config.memory_configured());
        assert_eq!(config.memory.match_threshold, 0.5);
        assert_eq!(config.memory.match_count, 2);
        assert_eq!(config.engine.gateway_timeout_secs, 30);
        assert_eq!(config.engine.max_steps, 64);
        assert_eq!(config.gateway.bind, "127.0.0.1:3000");
        assert_eq!(config.replies.received, "Received.");
    }

    #[test]
    fn test_full_config() {
        let toml_str = r#"
[model]
model_id = "gemini-2.0-flash-exp"
api_key = "g-test"

[model.retry]
max_retries = 4

[embedding]
provider = "ollama"
model = "nomic-embed-text"
base_url = "http://localhost:11434/v1"
dimensions = 768

[memory]
db_path = "/tmp/weft.db"
match_threshold = 0.7

[engine]
gateway_timeout_secs = 5
workflow_path = "workflows/triage.toml"

[gateway]
bind = "0.0.0.0:8080"
token = "secret"

[replies]
escalation = "Un manager arrive."

[actions]
send_sms_alert = ["echo alert"]
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let model = config.model.as_ref().unwrap();
        assert_eq!(model.provider, "gemini");
        assert_eq!(model.model_id, "gemini-2.0-flash-exp");
        assert_eq!(model.retry.as_ref().unwrap().max_retries, 4);
        assert_eq!(model.retry.as_ref().unwrap().initial_backoff_ms, 500);
        assert!(config.memory_configured());
        assert_eq!(config.memory.match_threshold, 0.7);
        assert_eq!(config.memory.match_count, 2);
        assert_eq!(config.engine.gateway_timeout_secs, 5);
        assert_eq!(config.gateway.token.as_deref(), Some("secret"));
        assert_eq!(config.replies.escalation, "Un manager arrive.");
        assert_eq!(config.replies.received, "Received.");
        assert_eq!(config.actions["send_sms_alert"], vec!["echo alert"]);
    }

    #[test]
    fn test_memory_disabled_is_unconfigured() {
        let toml_str = r#"
[embedding]
model = "text-embedding-004"

[memory]
enabled = false
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(!config.memory_configured());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/x.db"), PathBuf::from("/abs/x.db"));
        if let Some(home) = dirs_home() {
            assert_eq!(expand_home("~/x.db"), home.join("x.db"));
        }
    }
}
