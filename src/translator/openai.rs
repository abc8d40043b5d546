//! OpenAI-compatible HTTP backend
//!
//! Talks to any server exposing `GET /v1/models` and
//! `POST /v1/chat/completions` (llama.cpp server, vLLM, OpenAI itself).
//! Transient transport failures are retried with backoff; cancellation
//! drops the in-flight request.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{
    ChatBackend, ChatCompletion, ChatMessage, ChatRequest, ModelInfo, TranslatorError,
    TranslatorResult,
};
use crate::utils::retry::{with_retry_if, RetryConfig};

/// Configuration for the HTTP backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// Server base URL, without the `/v1` suffix
    pub endpoint: String,

    /// Bearer token, if the server requires one
    pub api_key: Option<String>,

    /// Model name sent with each completion
    pub model: String,

    /// TCP connect timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080".to_string(),
            api_key: None,
            model: "default".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    top_p: f32,
    frequency_penalty: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionUsage {
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelInfo>,
}

/// OpenAI-compatible chat backend
pub struct OpenAiBackend {
    client: Client,
    config: OpenAiConfig,
    retry: RetryConfig,
}

impl OpenAiBackend {
    /// Create a backend with the default retry policy
    pub fn new(config: OpenAiConfig) -> TranslatorResult<Self> {
        Self::with_retry(config, RetryConfig::default())
    }

    /// Create a backend with a custom retry policy
    pub fn with_retry(config: OpenAiConfig, retry: RetryConfig) -> TranslatorResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            config,
            retry,
        })
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.config.endpoint.trim_end_matches('/'))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn check_status(response: reqwest::Response) -> TranslatorResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TranslatorError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn send_completion(&self, request: &ChatRequest) -> TranslatorResult<ChatCompletion> {
        let body = CompletionRequest {
            model: &self.config.model,
            messages: &request.messages,
            temperature: request.sampling.temperature,
            top_p: request.sampling.top_p,
            frequency_penalty: request.sampling.frequency_penalty,
            max_tokens: request.sampling.max_tokens,
            stream: false,
        };

        let mut builder = self.authorize(self.client.post(self.url("chat/completions")));
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = Self::check_status(builder.json(&body).send().await?).await?;
        let parsed: CompletionResponse = response.json().await?;

        // Null content reads as empty, missing usage as zero tokens
        let text = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| TranslatorError::InvalidResponse("no choices".to_string()))?
            .message
            .content
            .unwrap_or_default();
        let completion_tokens = parsed.usage.map_or(0, |u| u.completion_tokens);

        Ok(ChatCompletion {
            text,
            completion_tokens,
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn list_models(&self) -> TranslatorResult<Vec<ModelInfo>> {
        let response = self
            .authorize(self.client.get(self.url("models")))
            .send()
            .await?;
        let list: ModelList = Self::check_status(response).await?.json().await?;
        tracing::debug!(count = list.data.len(), "Listed backend models");
        Ok(list.data)
    }

    async fn create_chat_completion(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> TranslatorResult<ChatCompletion> {
        let call = with_retry_if(
            &self.retry,
            || self.send_completion(&request),
            TranslatorError::is_recoverable,
        );

        tokio::select! {
            _ = cancel.cancelled() => Err(TranslatorError::Cancelled),
            result = call => result,
        }
    }
}
