//! Ollama-compatible AI backend client
//!
//! Two endpoints are used:
//! - `GET {endpoint}/api/tags` lists installed models (reachability probe)
//! - `POST {endpoint}/api/generate` completes a prompt without streaming
//!
//! Generation is bounded by the configured timeout and can be aborted
//! through a [`CancellationToken`].

use crate::{config::AiBackendConfig, errors::AiBackendError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Bound on the `/api/tags` probe
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    top_k: u32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            top_p: 0.9,
            top_k: 40,
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    endpoint: String,
    model: String,
    timeout: Duration,
}

impl OllamaClient {
    pub fn new(config: &AiBackendConfig) -> Self {
        Self {
            client: Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout: config.timeout(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn unreachable(&self, err: impl std::fmt::Display) -> AiBackendError {
        AiBackendError::Unreachable {
            endpoint: self.endpoint.clone(),
            reason: err.to_string(),
        }
    }

    /// Names of the models installed on the backend
    pub async fn list_models(&self) -> Result<Vec<String>, AiBackendError> {
        let url = format!("{}/api/tags", self.endpoint);
        let request = async {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|err| self.unreachable(err))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(AiBackendError::Status {
                    code: status.as_u16(),
                    body,
                });
            }
            response
                .json::<TagsResponse>()
                .await
                .map_err(|err| AiBackendError::Decode(err.to_string()))
        };

        let tags = tokio::time::timeout(HEALTH_TIMEOUT, request)
            .await
            .map_err(|_| AiBackendError::TimedOut {
                timeout_ms: HEALTH_TIMEOUT.as_millis() as u64,
            })??;
        Ok(tags.models.into_iter().map(|model| model.name).collect())
    }

    /// Whether `/api/tags` answers within [`HEALTH_TIMEOUT`]
    pub async fn is_reachable(&self) -> bool {
        match self.list_models().await {
            Ok(_) => true,
            Err(err) => {
                debug!("AI backend probe failed: {}", err);
                false
            }
        }
    }

    /// Fails with [`AiBackendError::ModelMissing`] when the configured model
    /// is not installed. Tags match on the model family, so `llama3.1:8b`
    /// accepts any `llama3.1` tag.
    pub async fn ensure_model(&self) -> Result<(), AiBackendError> {
        let family = self.model.split(':').next().unwrap_or(&self.model);
        let models = self.list_models().await?;
        if models.iter().any(|name| name.contains(family)) {
            Ok(())
        } else {
            Err(AiBackendError::ModelMissing {
                model: self.model.clone(),
            })
        }
    }

    /// Complete `prompt`; the response text comes back trimmed
    pub async fn generate(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, AiBackendError> {
        let url = format!("{}/api/generate", self.endpoint);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions::default(),
        };
        let request = async {
            let response = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|err| self.unreachable(err))?;
            let status = response.status();
            if !status.is_success() {
                let text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<response unavailable>".to_string());
                return Err(AiBackendError::Status {
                    code: status.as_u16(),
                    body: text,
                });
            }
            response
                .json::<GenerateResponse>()
                .await
                .map_err(|err| AiBackendError::Decode(err.to_string()))
        };

        let timeout_ms = self.timeout.as_millis() as u64;
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AiBackendError::Cancelled),
            outcome = tokio::time::timeout(self.timeout, request) => match outcome {
                Ok(result) => result?,
                Err(_) => {
                    warn!("AI generation exceeded {}ms", timeout_ms);
                    return Err(AiBackendError::TimedOut { timeout_ms });
                }
            },
        };
        Ok(response.response.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_normalised() {
        let config = AiBackendConfig {
            endpoint: "http://localhost:11434/".into(),
            ..AiBackendConfig::default()
        };
        let client = OllamaClient::new(&config);
        assert_eq!(client.endpoint(), "http://localhost:11434");
        assert_eq!(client.model(), "llama3.1:8b");
    }

    #[test]
    fn generate_request_shape() {
        let body = GenerateRequest {
            model: "m",
            prompt: "p",
            stream: false,
            options: GenerateOptions::default(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["top_k"], 40);
        assert!((json["options"]["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let config = AiBackendConfig {
            endpoint: "http://127.0.0.1:9".into(),
            ..AiBackendConfig::default()
        };
        let client = OllamaClient::new(&config);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client.generate("hi", &cancel).await.unwrap_err();
        assert_eq!(err, AiBackendError::Cancelled);
    }
}
