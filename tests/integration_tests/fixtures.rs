//! Test fixtures for integration tests
//!
//! Provides in-process chat backends, completion payloads and volume helpers.

use async_trait::async_trait;
use novel_relay::models::Glossary;
use novel_relay::source::LocalVolumeStore;
use novel_relay::translator::{
    ChatBackend, ChatCompletion, ChatRequest, ChatRole, ModelInfo, TranslatorError,
    TranslatorResult,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Prefix the echo backend puts in front of every line
pub const ECHO_PREFIX: &str = "译";

/// Backend that "translates" by prefixing each requested line
///
/// Lines listed in `degrade` come back with `max_tokens` completion tokens,
/// which the translator treats as degenerate output.
pub struct EchoBackend {
    pub model_id: String,
    pub degrade: Vec<String>,
    pub calls: AtomicUsize,
}

impl EchoBackend {
    pub fn new() -> Arc<Self> {
        Self::with_model("sakura-14b-qwen2.5-v1.0-iq4xs.gguf")
    }

    pub fn with_model(model_id: &str) -> Arc<Self> {
        Arc::new(Self {
            model_id: model_id.to_string(),
            degrade: Vec::new(),
            calls: AtomicUsize::new(0),
        })
    }

    /// Backend degrading any request that contains one of `lines`
    pub fn degrading(lines: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            model_id: "sakura".to_string(),
            degrade: lines.iter().map(|s| s.to_string()).collect(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatBackend for EchoBackend {
    async fn list_models(&self) -> TranslatorResult<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            id: self.model_id.clone(),
            meta: None,
        }])
    }

    async fn create_chat_completion(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> TranslatorResult<ChatCompletion> {
        if cancel.is_cancelled() {
            return Err(TranslatorError::Cancelled);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);

        let user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let text = user.split_once('\n').map_or("", |(_, rest)| rest);

        if self.degrade.iter().any(|d| text.contains(d.as_str())) {
            return Ok(ChatCompletion {
                text: "啊".repeat(64),
                completion_tokens: request.sampling.max_tokens,
            });
        }

        let translated = text
            .lines()
            .map(|line| format!("{ECHO_PREFIX}{line}"))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(ChatCompletion {
            text: translated,
            completion_tokens: 10,
        })
    }
}

/// OpenAI-style chat completion payload
pub fn completion_body(content: &str, completion_tokens: u32) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": 100,
            "completion_tokens": completion_tokens,
            "total_tokens": 100 + completion_tokens
        }
    })
}

/// OpenAI-style model list payload
pub fn models_body(id: &str, meta: serde_json::Value) -> serde_json::Value {
    json!({
        "object": "list",
        "data": [{"id": id, "object": "model", "meta": meta}]
    })
}

fn lines(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

/// Create a local volume from `(chapter_id, paragraphs)` pairs
pub async fn create_volume(
    store: &LocalVolumeStore,
    volume_id: &str,
    glossary: Glossary,
    chapters: &[(&str, &[&str])],
) {
    store
        .create_volume(
            volume_id,
            "glossary-1",
            glossary,
            chapters
                .iter()
                .map(|(id, paragraphs)| (id.to_string(), lines(paragraphs)))
                .collect(),
        )
        .await
        .unwrap();
}
