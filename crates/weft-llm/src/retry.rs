use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use weft_core::config::RetryConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::GenerativeGateway;
use weft_core::types::{Completion, CompletionMode};

/// A generative gateway that retries transient failures with backoff.
pub struct RetryingClient {
    inner: Box<dyn GenerativeGateway>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(inner: Box<dyn GenerativeGateway>, retry_config: RetryConfig) -> Self {
        Self {
            inner,
            retry_config,
        }
    }
}

fn is_retryable(e: &WeftError) -> bool {
    match e {
        WeftError::ExternalService { message, .. } => {
            message.contains("429")
                || message.contains("500")
                || message.contains("502")
                || message.contains("503")
                || message.contains("timeout")
                || message.contains("connection")
        }
        WeftError::GatewayTimeout { .. } => true,
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = 2u64
        .checked_pow(attempt)
        .map_or(u64::MAX, |factor| config.initial_backoff_ms.saturating_mul(factor))
        .min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl GenerativeGateway for RetryingClient {
    fn complete(&self, prompt: &str, mode: CompletionMode) -> BoxFuture<'_, Result<Completion>> {
        let prompt = prompt.to_string();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;
            let mut attempt = 0;
            loop {
                match self.inner.complete(&prompt, mode).await {
                    Ok(completion) => return Ok(completion),
                    Err(e) if is_retryable(&e) && attempt < max_retries => {
                        let backoff = calculate_backoff(attempt, &self.retry_config);
                        warn!(
                            provider = self.inner.name(),
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying generative request"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
