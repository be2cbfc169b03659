use crate::circuit_breaker::CircuitBreaker;
use crate::traits::*;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Connection and generation settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub base_url: String,
    pub model: String,
    #[serde(skip)]
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the endpoint for a JSON object response.
    pub json_mode: bool,
    pub breaker_threshold: usize,
    pub breaker_cooldown_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            request_timeout_secs: 30,
            max_retries: 2,
            temperature: 0.0,
            max_tokens: 512,
            json_mode: true,
            breaker_threshold: 5,
            breaker_cooldown_secs: 30,
        }
    }
}

pub struct OpenAICompatibleProvider {
    client: Client,
    settings: ProviderSettings,
    circuit_breaker: CircuitBreaker,
}

impl OpenAICompatibleProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
            .build()
            .unwrap_or_else(|_| Client::new());
        let circuit_breaker = CircuitBreaker::new(
            settings.breaker_threshold,
            Duration::from_secs(settings.breaker_cooldown_secs),
        );

        Self {
            client,
            settings,
            circuit_breaker,
        }
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    fn request_body(&self, messages: &[Message]) -> serde_json::Value {
        let mut body = json!({
            "model": self.settings.model,
            "messages": messages,
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
        });

        if self.settings.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        body
    }

    async fn generate_once(&self, messages: &[Message]) -> Result<GenerateResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'));
        let mut request = self.client.post(&url).json(&self.request_body(messages));

        if let Some(api_key) = &self.settings.api_key {
            request = request.bearer_auth(api_key);
        }

        debug!(url = %url, model = %self.settings.model, "Sending classification request");

        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                ProviderError::Http(format!("Network connection failed: {}", e))
            } else {
                ProviderError::Http(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(ProviderError::Api { status, body });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        parse_completion(&json)
    }
}

/// Pull the first choice out of a chat completion payload.
pub(crate) fn parse_completion(json: &serde_json::Value) -> Result<GenerateResponse, ProviderError> {
    let choice = json["choices"]
        .get(0)
        .ok_or_else(|| ProviderError::Parse("No choices in response".to_string()))?;

    let content = choice["message"]["content"].as_str().map(|s| s.to_string());
    let finish_reason = choice["finish_reason"]
        .as_str()
        .unwrap_or("stop")
        .to_string();

    Ok(GenerateResponse {
        content,
        finish_reason,
    })
}

fn retry_delay_for_error(attempt: u32, err: &ProviderError) -> Duration {
    if let ProviderError::Api { status: 429, body } = err {
        if let Some(seconds) = extract_retry_seconds(&body.to_lowercase()) {
            return Duration::from_secs(seconds.min(30));
        }
        return Duration::from_secs(2_u64.saturating_pow(attempt + 1).min(30));
    }
    Duration::from_millis(250_u64.saturating_mul(2_u64.saturating_pow(attempt)).min(5000))
}

fn extract_retry_seconds(msg: &str) -> Option<u64> {
    for token in msg.split(|ch: char| !ch.is_ascii_alphanumeric() && ch != '.') {
        if let Some(stripped) = token.strip_suffix('s') {
            if let Ok(v) = stripped.parse::<u64>() {
                if v > 0 {
                    return Some(v);
                }
            }
        }
    }
    None
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    async fn generate(&self, messages: &[Message]) -> Result<GenerateResponse, ProviderError> {
        self.circuit_breaker.should_allow_request()?;

        let mut last_error = None;

        for attempt in 0..=self.settings.max_retries {
            match self.generate_once(messages).await {
                Ok(response) => {
                    self.circuit_breaker.record_success();
                    return Ok(response);
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, "Classification request failed: {}", e);
                    let retryable = e.is_retryable();
                    let delay = retry_delay_for_error(attempt, &e);
                    last_error = Some(e);
                    if !retryable {
                        break;
                    }
                    if attempt < self.settings.max_retries {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        self.circuit_breaker.record_failure();

        Err(last_error.unwrap_or_else(|| ProviderError::Http("Unknown error".to_string())))
    }

    fn name(&self) -> &str {
        "OpenAI Compatible"
    }
}
