use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    // Collaborator errors
    #[error("Collaborator not configured: {0}")]
    ConfigurationMissing(String),

    #[error("{service} request failed: {message}")]
    ExternalService { service: String, message: String },

    #[error("{service} call timed out after {timeout_secs}s")]
    GatewayTimeout { service: String, timeout_secs: u64 },

    #[error("Structured output could not be parsed: {0}")]
    MalformedOutput(String),

    // Workflow errors
    #[error("Node execution failed: {node}: {message}")]
    NodeExecution { node: String, message: String },

    #[error("Transform {name} failed: {message}")]
    Transform { name: String, message: String },

    #[error("Transform not registered: {0}")]
    UnknownTransform(String),

    #[error("Rule parse error: {0}")]
    RuleParse(String),

    #[error("Rule evaluation error: {0}")]
    RuleEvaluation(String),

    #[error("Run exceeded max steps ({0})")]
    StepLimitExceeded(usize),

    #[error("Invalid workflow definition: {0}")]
    Definition(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WeftError {
    /// Shorthand for an external service failure.
    pub fn service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WeftError>;
