use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backoff::jittered_delay;
use crate::error::GeneratorError;
use crate::rate_limiter::TokenBucket;

/// An opaque call to the generator: `input` is whatever the calling stage
/// transform wants generated from, `stage` is included only for logging
/// and provider-side routing, never interpreted by the client itself.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub stage: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationResponse {
    pub output: serde_json::Value,
}

/// The generator call seam. An [`HttpGeneratorClient`] is the bundled
/// implementation; tests substitute a stub.
#[async_trait]
pub trait GeneratorClient: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, GeneratorError>;
}

pub struct HttpGeneratorClientConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_budget: Duration,
    pub requests_per_minute: u32,
}

/// HTTP-backed generator client: jittered exponential backoff on transient
/// failures (up to `max_retries`, bounded by `retry_budget`), and a
/// per-process token-bucket rate limit applied before every attempt.
pub struct HttpGeneratorClient {
    http: reqwest::Client,
    config: HttpGeneratorClientConfig,
    limiter: TokenBucket,
}

impl HttpGeneratorClient {
    pub fn new(config: HttpGeneratorClientConfig) -> Self {
        let limiter = TokenBucket::new(config.requests_per_minute);
        Self {
            http: reqwest::Client::new(),
            config,
            limiter,
        }
    }

    async fn attempt(&self, request: &GenerationRequest) -> Result<GenerationResponse, GeneratorError> {
        let mut req = self
            .http
            .post(&self.config.endpoint)
            .timeout(self.config.timeout)
            .json(request);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Transient(format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Permanent(format!("{status}: {body}")));
        }

        response
            .json::<GenerationResponse>()
            .await
            .map_err(GeneratorError::Http)
    }
}

#[async_trait]
impl GeneratorClient for HttpGeneratorClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, GeneratorError> {
        let deadline = Instant::now() + self.config.retry_budget;
        let mut attempt = 1;

        loop {
            self.limiter.acquire().await;
            debug!(stage = %request.stage, attempt, "calling generator");

            match self.attempt(&request).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() && attempt <= self.config.max_retries => {
                    let delay = jittered_delay(attempt, Duration::from_millis(500), self.config.retry_budget);
                    if Instant::now() + delay >= deadline {
                        warn!(error = %err, "generator retry budget exhausted");
                        return Err(err);
                    }
                    warn!(error = %err, attempt, delay = ?delay, "retrying generator call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
