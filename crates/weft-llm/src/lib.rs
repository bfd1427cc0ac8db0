pub mod providers;
pub mod retry;

use weft_core::config::ModelConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::GenerativeGateway;

pub use providers::gemini::GeminiClient;
pub use retry::RetryingClient;

/// Create a generative gateway based on the provider name, wrapped in
/// retries when the model config asks for them.
pub fn create_gateway(config: &ModelConfig) -> Result<Box<dyn GenerativeGateway>> {
    let client: Box<dyn GenerativeGateway> = match config.provider.as_str() {
        "gemini" | "google" => Box::new(GeminiClient::new(config.clone())?),
        other => {
            return Err(WeftError::Config(format!(
                "Generative provider not supported: {}",
                other
            )))
        }
    };

    Ok(match config.retry.clone() {
        Some(retry) => Box::new(RetryingClient::new(client, retry)),
        None => client,
    })
}
