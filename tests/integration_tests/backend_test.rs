//! OpenAI-compatible backend tests against a mock HTTP server
//!
//! Covers model listing, request shape, transient failure retry and
//! cancellation of in-flight requests.

use novel_relay::models::Glossary;
use novel_relay::translator::{
    ChatBackend, ChatMessage, ChatRequest, OpenAiBackend, OpenAiConfig, SamplingParams,
    SegmentContext, SegmentTranslator, TranslatorError, TranslatorSettings, UploadPolicy,
};
use novel_relay::utils::RetryConfig;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::fixtures::{completion_body, models_body};

fn backend(server: &MockServer) -> OpenAiBackend {
    OpenAiBackend::with_retry(
        OpenAiConfig {
            endpoint: server.uri(),
            api_key: Some("secret".to_string()),
            model: "sakura".to_string(),
            ..Default::default()
        },
        RetryConfig::with_delays(2, 10, 50),
    )
    .unwrap()
}

fn request(text: &str) -> ChatRequest {
    ChatRequest {
        messages: vec![ChatMessage::user(text)],
        sampling: SamplingParams::default(),
        timeout: None,
    }
}

// ============================================================================
// Model listing
// ============================================================================

#[tokio::test]
async fn test_list_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(models_body("sakura-14b.gguf", json!({"size": 42}))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let models = backend(&server).list_models().await.unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].id, "sakura-14b.gguf");
    assert_eq!(models[0].meta.as_ref().unwrap()["size"], json!(42));
}

// ============================================================================
// Chat completion
// ============================================================================

#[tokio::test]
async fn test_chat_completion_request_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "model": "sakura",
            "stream": false,
            "max_tokens": 4096,
            "messages": [{"role": "user", "content": "こんにちは"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("你好", 3)))
        .expect(1)
        .mount(&server)
        .await;

    let completion = backend(&server)
        .create_chat_completion(request("こんにちは"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(completion.text, "你好");
    assert_eq!(completion.completion_tokens, 3);
}

#[tokio::test]
async fn test_transient_failure_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("好", 1)))
        .mount(&server)
        .await;

    let completion = backend(&server)
        .create_chat_completion(request("良"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(completion.text, "好");
}

#[tokio::test]
async fn test_client_error_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let result = backend(&server)
        .create_chat_completion(request("x"), &CancellationToken::new())
        .await;
    match result {
        Err(TranslatorError::Status { status, body }) => {
            assert_eq!(status, 400);
            assert_eq!(body, "bad request");
        }
        other => panic!("Expected status error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_usage_counts_as_zero_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "好"}}]
        })))
        .mount(&server)
        .await;

    let completion = backend(&server)
        .create_chat_completion(request("x"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(completion.text, "好");
    assert_eq!(completion.completion_tokens, 0);
}

#[tokio::test]
async fn test_null_content_reads_as_empty() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": null}}],
            "usage": {"completion_tokens": 0}
        })))
        .mount(&server)
        .await;

    let completion = backend(&server)
        .create_chat_completion(request("x"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(completion.text, "");
}

#[tokio::test]
async fn test_empty_choices_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let result = backend(&server)
        .create_chat_completion(request("x"), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(TranslatorError::InvalidResponse(_))));
}

#[tokio::test]
async fn test_cancellation_aborts_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body("遅い", 1))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let backend = backend(&server);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let result = backend.create_chat_completion(request("x"), &cancel).await;
    assert!(matches!(result, Err(TranslatorError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

// ============================================================================
// Segment translator over HTTP
// ============================================================================

#[tokio::test]
async fn test_murasaki_gate_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(models_body(
            "Murasaki-14B-v0.2-Q6_K.gguf",
            json!({
                "n_vocab": 151936,
                "n_ctx_train": 32768,
                "n_embd": 5120,
                "size": 12121937216u64
            }),
        )))
        .mount(&server)
        .await;

    let settings = TranslatorSettings {
        seg_length: 1000,
        prev_seg_length: 0,
        ..Default::default()
    };
    let mut translator = SegmentTranslator::new(Arc::new(backend(&server)), settings)
        .with_policy(UploadPolicy::murasaki());
    translator.init().await;

    let decision = translator.allow_upload();
    assert!(decision.allowed, "{}", decision.reason);
}

#[tokio::test]
async fn test_segment_translation_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body("<think>嗯</think>\n第一行\n第二行", 12)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let translator =
        SegmentTranslator::new(Arc::new(backend(&server)), TranslatorSettings::default());
    let cancel = CancellationToken::new();
    let glossary = Glossary::new();
    let seg: Vec<String> = vec!["一行目".into(), "".into(), "二行目".into()];
    let ctx = SegmentContext {
        glossary: &glossary,
        prev_segs: &[],
        cancel: &cancel,
    };

    let translation = translator.translate(&seg, ctx).await.unwrap();
    assert_eq!(translation.lines, vec!["第一行", "", "第二行"]);
    assert_eq!(translation.log, vec!["第1次，成功"]);
}

#[tokio::test]
async fn test_empty_reply_retried_as_mismatch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": null}}]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("第一行\n第二行", 5)))
        .mount(&server)
        .await;

    let translator =
        SegmentTranslator::new(Arc::new(backend(&server)), TranslatorSettings::default());
    let cancel = CancellationToken::new();
    let glossary = Glossary::new();
    let seg: Vec<String> = vec!["一行目".into(), "二行目".into()];
    let ctx = SegmentContext {
        glossary: &glossary,
        prev_segs: &[],
        cancel: &cancel,
    };

    let translation = translator.translate(&seg, ctx).await.unwrap();
    assert_eq!(translation.lines, vec!["第一行", "第二行"]);
    assert_eq!(translation.log, vec!["第1次，行数不匹配", "第2次，成功"]);
    assert_eq!(translation.attempts, 2);
}
