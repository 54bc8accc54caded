//! Generation service adapter
//!
//! Recommendation text comes from an external text-generation endpoint
//! (Ollama's `/api/generate` wire shape). Failures are never raised to the
//! caller: they come back as descriptive text that is stored in place of a
//! recommendation, so a breach is recorded even when generation is down.

use crate::config::GenerationConfig;
use crate::error::{MonitorError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Stored as the recommendation when the service cannot be reached
pub const UNREACHABLE_MESSAGE: &str =
    "Error: Generation service is not running or unreachable. Please start it and make sure the configured model is available.";

/// Stored when the service answers without any text
pub const EMPTY_RESPONSE_MESSAGE: &str = "No recommendation generated.";

/// Anything that turns a prompt into recommendation text.
///
/// Implementations must be thread-safe; the queued dispatch mode shares one
/// generator with a background worker.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

#[derive(Debug)]
enum GenerationFailure {
    Unreachable(String),
    Request(String),
}

impl From<reqwest::Error> for GenerationFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            GenerationFailure::Unreachable(err.to_string())
        } else {
            GenerationFailure::Request(err.to_string())
        }
    }
}

/// Upper bound for the delay between retries
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

fn next_backoff(delay: Duration) -> Duration {
    delay.saturating_mul(2).min(MAX_RETRY_BACKOFF)
}

/// Failure text stored for a request that reached the service but failed
pub fn request_failure_message(cause: &str) -> String {
    format!("Error: Failed to get recommendation from the generation service: {}", cause)
}

pub struct OllamaGenerator {
    client: Client,
    config: GenerationConfig,
}

impl OllamaGenerator {
    pub fn new(config: GenerationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MonitorError::Generation(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    async fn request(&self, prompt: &str) -> std::result::Result<String, GenerationFailure> {
        let body = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let parsed: GenerateResponse = response.json().await?;
        Ok(parsed
            .response
            .unwrap_or_else(|| EMPTY_RESPONSE_MESSAGE.to_string()))
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let attempts = self.config.max_attempts.max(1);
        let mut delay = self.config.retry_backoff;

        for attempt in 1..=attempts {
            match self.request(prompt).await {
                Ok(text) => {
                    debug!("Generation succeeded on attempt {} ({} chars)", attempt, text.len());
                    return Ok(text);
                }
                Err(GenerationFailure::Unreachable(cause)) if attempt < attempts => {
                    warn!(
                        "Generation service unreachable (attempt {}/{}), retrying in {:?}: {}",
                        attempt, attempts, delay, cause
                    );
                    tokio::time::sleep(delay).await;
                    delay = next_backoff(delay);
                }
                Err(GenerationFailure::Unreachable(cause)) => {
                    error!("Generation service not running or unreachable at {}: {}", self.config.endpoint, cause);
                    return Ok(UNREACHABLE_MESSAGE.to_string());
                }
                Err(GenerationFailure::Request(cause)) => {
                    error!("Error calling generation service: {}", cause);
                    return Ok(request_failure_message(&cause));
                }
            }
        }

        Ok(UNREACHABLE_MESSAGE.to_string())
    }
}

impl std::fmt::Debug for OllamaGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaGenerator")
            .field("endpoint", &self.config.endpoint)
            .field("model", &self.config.model)
            .field("timeout", &self.config.timeout)
            .finish()
    }
}
