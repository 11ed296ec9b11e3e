use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use langchain_llm::config::{ModelConfig, Provider, build_client_from_configs};
use langchain_llm::error::LLMError;
use langchain_llm::http::{
    DynHttpTransport, HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport,
};
use langchain_llm::provider::{AnthropicMessagesProvider, GoogleGeminiProvider};
use langchain_llm::types::{ChatRequest, FinishReason, Message, TokenUsage};
use langchain_llm::usage::UsageTracker;
use langchain_llm::{ChatModel, RetryPolicy};
use serde_json::{Value, json};

/// Canned reply returned by [`MockTransport`].
enum Reply {
    Json {
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
        body: String,
    },
    Sse(Vec<String>),
}

impl Reply {
    fn ok(body: Value) -> Self {
        Reply::Json {
            status: 200,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    fn status(status: u16, headers: Vec<(&'static str, &'static str)>, body: Value) -> Self {
        Reply::Json {
            status,
            headers,
            body: body.to_string(),
        }
    }

    /// SSE body split into the given network chunks.
    fn sse(chunks: &[&str]) -> Self {
        Reply::Sse(chunks.iter().map(|chunk| chunk.to_string()).collect())
    }
}

type Responder = Box<dyn Fn(&HttpRequest) -> Reply + Send + Sync>;

/// In-memory transport that records every request.
struct MockTransport {
    responder: Responder,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    fn queue(replies: Vec<Reply>) -> Arc<Self> {
        let replies = Mutex::new(VecDeque::from(replies));
        Self::responder(move |_| {
            replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("mock transport ran out of replies")
        })
    }

    fn responder(f: impl Fn(&HttpRequest) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(f),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn reply(&self, request: HttpRequest) -> Reply {
        let reply = (self.responder)(&request);
        self.requests.lock().unwrap().push(request);
        reply
    }
}

fn header_map(headers: Vec<(&'static str, &'static str)>) -> HashMap<String, String> {
    headers
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        match self.reply(request) {
            Reply::Json {
                status,
                headers,
                body,
            } => Ok(HttpResponse {
                status,
                headers: header_map(headers),
                body: body.into_bytes(),
            }),
            Reply::Sse(_) => panic!("unexpected buffered request for an SSE reply"),
        }
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        let (status, headers, chunks) = match self.reply(request) {
            Reply::Json {
                status,
                headers,
                body,
            } => (status, header_map(headers), vec![body]),
            Reply::Sse(chunks) => (200, HashMap::new(), chunks),
        };
        let body = stream::iter(chunks.into_iter().map(|chunk| Ok(chunk.into_bytes())));
        Ok(HttpStreamResponse {
            status,
            headers,
            body: Box::pin(body),
        })
    }
}

fn body_json(request: &HttpRequest) -> Value {
    serde_json::from_slice(&request.body).unwrap()
}

fn fast_retries() -> RetryPolicy {
    RetryPolicy::new(2).with_base_delay(Duration::from_millis(1))
}

#[tokio::test]
async fn openai_handle_round_trip() {
    let transport = MockTransport::queue(vec![Reply::ok(json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "model": "gpt-5-nano-2025-08-07",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Rust is a systems language."},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 12, "completion_tokens": 6, "total_tokens": 18}
    }))]);
    let configs = vec![
        ModelConfig::new("openai", Provider::OpenAi, "sk-test")
            .with_base_url("http://mock.local")
            .with_default_model("gpt-5-nano"),
    ];
    let client = build_client_from_configs(&configs, transport.clone() as DynHttpTransport).unwrap();

    let response = client
        .invoke(
            "openai",
            vec![
                Message::system("Answer in one sentence."),
                Message::user("What is Rust?"),
            ],
        )
        .await
        .unwrap();
    assert_eq!(response.content, "Rust is a systems language.");
    assert_eq!(response.finish_reason, Some(FinishReason::Stop));
    assert_eq!(response.usage, Some(TokenUsage::new(12, 6)));
    assert_eq!(response.provider.request_id.as_deref(), Some("chatcmpl-1"));

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, "http://mock.local/v1/chat/completions");
    assert_eq!(
        requests[0].headers.get("Authorization").map(String::as_str),
        Some("Bearer sk-test")
    );
    let body = body_json(&requests[0]);
    assert_eq!(body["model"], "gpt-5-nano");
    assert_eq!(body["stream"], false);
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["content"], "What is Rust?");
}

#[tokio::test]
async fn openai_stream_ends_at_done_marker() {
    let transport = MockTransport::queue(vec![Reply::sse(&[
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"}}]}\n\n",
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: {\"id\":\"c1\",\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2,\"total_tokens\":5}}\n\n",
        "data: [DONE]\n\n",
    ])]);
    let configs = vec![
        ModelConfig::new("openai", Provider::OpenAi, "sk-test").with_default_model("gpt-5-nano"),
    ];
    let client = build_client_from_configs(&configs, transport.clone() as DynHttpTransport).unwrap();

    let mut stream = client.stream("openai", "Say hello").await.unwrap();
    let mut text = String::new();
    let mut usage = None;
    let mut terminal = false;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.unwrap();
        text.push_str(&chunk.delta);
        usage = chunk.usage.or(usage);
        terminal = chunk.is_terminal;
    }
    assert_eq!(text, "Hello");
    assert_eq!(usage, Some(TokenUsage::new(3, 2)));
    assert!(terminal);

    let body = body_json(&transport.requests()[0]);
    assert_eq!(body["stream"], true);
    assert_eq!(body["stream_options"]["include_usage"], true);
}

#[tokio::test]
async fn truncated_openai_stream_reports_stream_closed() {
    let transport = MockTransport::queue(vec![Reply::sse(&[
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"partial\"}}]}\n\n",
    ])]);
    let configs = vec![
        ModelConfig::new("openai", Provider::OpenAi, "sk-test").with_default_model("gpt-5-nano"),
    ];
    let client = build_client_from_configs(&configs, transport as DynHttpTransport).unwrap();

    let items: Vec<_> = client.stream("openai", "hi").await.unwrap().collect().await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap().delta, "partial");
    assert!(matches!(items[1], Err(LLMError::StreamClosed { .. })));
}

#[tokio::test]
async fn anthropic_stream_records_usage() {
    let transport = MockTransport::queue(vec![Reply::sse(&[
        "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"type\":\"message\",\"role\":\"assistant\",\"model\":\"claude-3-haiku-20240307\",\"content\":[],\"usage\":{\"input_tokens\":12,\"output_tokens\":1}}}\n\n",
        "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
        "event: ping\ndata: {\"type\":\"ping\"}\n\n",
        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n",
        "event: content_block_delta\r\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" there\"}}\r\n\r\n",
        "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
        "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\",\"stop_sequence\":null},\"usage\":{\"output_tokens\":6}}\n\n",
        "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
    ])]);
    let provider = AnthropicMessagesProvider::new(transport.clone() as DynHttpTransport, "ak-test")
        .with_base_url("http://mock.local");
    let tracker = Arc::new(UsageTracker::new());
    let model = ChatModel::new(Arc::new(provider))
        .with_model("claude-3-haiku-20240307")
        .with_tracker(tracker.clone());

    let request = ChatRequest::new(vec![Message::system("Be warm."), Message::user("Greet me")]);
    let mut stream = model.stream_chat(request).await.unwrap();
    let mut text = String::new();
    let mut finish = None;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.unwrap();
        text.push_str(&chunk.delta);
        finish = chunk.finish_reason.or(finish);
    }
    assert_eq!(text, "Hello there");
    assert_eq!(finish, Some(FinishReason::Stop));

    let summary = tracker.summary();
    assert_eq!(summary.calls, 1);
    assert_eq!(summary.prompt_tokens, 12);
    assert_eq!(summary.completion_tokens, 6);

    let request = &transport.requests()[0];
    assert_eq!(request.url, "http://mock.local/v1/messages");
    assert_eq!(
        request.headers.get("x-api-key").map(String::as_str),
        Some("ak-test")
    );
    assert_eq!(
        request.headers.get("anthropic-version").map(String::as_str),
        Some("2023-06-01")
    );
    let body = body_json(request);
    assert_eq!(body["system"], "Be warm.");
    assert_eq!(body["max_tokens"], 1024);
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);
}

fn anthropic_stream_with_usage(input: u64, output: u64) -> Reply {
    let start = format!(
        "event: message_start\ndata: {{\"type\":\"message_start\",\"message\":{{\"id\":\"msg_2\",\"type\":\"message\",\"role\":\"assistant\",\"model\":\"claude-3-haiku-20240307\",\"content\":[],\"usage\":{{\"input_tokens\":{input},\"output_tokens\":0}}}}}}\n\n"
    );
    let delta = format!(
        "event: message_delta\ndata: {{\"type\":\"message_delta\",\"delta\":{{\"stop_reason\":\"end_turn\",\"stop_sequence\":null}},\"usage\":{{\"output_tokens\":{output}}}}}\n\n"
    );
    Reply::Sse(vec![
        start,
        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"ok\"}}\n\n".to_string(),
        delta,
        "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n".to_string(),
    ])
}

#[tokio::test]
async fn streamed_usage_is_priced_under_provider_default_model() {
    let transport = MockTransport::queue(vec![anthropic_stream_with_usage(1000, 1000)]);
    let provider = AnthropicMessagesProvider::new(transport as DynHttpTransport, "ak-test")
        .with_default_model("claude-3-haiku-20240307");
    let tracker = Arc::new(UsageTracker::new());
    let model = ChatModel::new(Arc::new(provider)).with_tracker(tracker.clone());

    let chunks: Vec<_> = model.stream("hi").await.unwrap().collect().await;
    assert!(chunks.iter().all(Result::is_ok));

    let summary = tracker.summary();
    assert_eq!(
        summary.by_model.keys().collect::<Vec<_>>(),
        vec!["claude-3-haiku-20240307"]
    );
    assert!((summary.estimated_cost_usd - 1.5).abs() < 1e-9);
}

#[tokio::test]
async fn configured_client_tracks_streamed_usage() {
    let transport = MockTransport::queue(vec![anthropic_stream_with_usage(2000, 400)]);
    let configs = vec![
        ModelConfig::new("claude", Provider::Anthropic, "ak-test")
            .with_default_model("claude-3-haiku-20240307"),
    ];
    let client = build_client_from_configs(&configs, transport as DynHttpTransport).unwrap();

    let _: Vec<_> = client.stream("claude", "hi").await.unwrap().collect().await;

    let summary = client.usage().expect("configured clients track usage");
    assert_eq!(summary.calls, 1);
    assert_eq!(summary.prompt_tokens, 2000);
    assert_eq!(summary.completion_tokens, 400);
    assert!(summary.by_model.contains_key("claude-3-haiku-20240307"));
    assert!((summary.estimated_cost_usd - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn anthropic_auth_failure_is_not_retried() {
    let transport = MockTransport::queue(vec![Reply::status(
        401,
        Vec::new(),
        json!({"type": "error", "error": {"type": "authentication_error", "message": "invalid x-api-key"}}),
    )]);
    let provider = AnthropicMessagesProvider::new(transport.clone() as DynHttpTransport, "bad")
        .with_default_model("claude-3-haiku-20240307");
    let model = ChatModel::new(Arc::new(provider)).with_retry_policy(fast_retries());

    let err = model.invoke("hi").await.unwrap_err();
    assert!(matches!(err, LLMError::Auth { .. }), "{err:?}");
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn gemini_rate_limit_is_retried() {
    let transport = MockTransport::queue(vec![
        Reply::status(
            429,
            vec![("Retry-After", "0")],
            json!({"error": {"code": 429, "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED"}}),
        ),
        Reply::ok(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hi from Gemini"}]},
                "finishReason": "STOP",
                "index": 0
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 3, "totalTokenCount": 7},
            "modelVersion": "gemini-2.0-flash-lite"
        })),
    ]);
    let provider = GoogleGeminiProvider::new(transport.clone() as DynHttpTransport, "g-test")
        .with_base_url("http://mock.local")
        .with_default_model("gemini-2.0-flash-lite");
    let model = ChatModel::new(Arc::new(provider)).with_retry_policy(fast_retries());

    let response = model
        .invoke(vec![
            Message::system("Be brief."),
            Message::user("Hello"),
            Message::assistant("Hi!"),
            Message::user("Again"),
        ])
        .await
        .unwrap();
    assert_eq!(response.content, "Hi from Gemini");
    assert_eq!(response.usage, Some(TokenUsage::new(4, 3)));

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[1].url,
        "http://mock.local/v1beta/models/gemini-2.0-flash-lite:generateContent"
    );
    assert_eq!(
        requests[1].headers.get("x-goog-api-key").map(String::as_str),
        Some("g-test")
    );
    let body = body_json(&requests[1]);
    assert_eq!(body["system_instruction"]["parts"][0]["text"], "Be brief.");
    assert_eq!(body["contents"].as_array().unwrap().len(), 3);
    assert_eq!(body["contents"][1]["role"], "model");
}

#[tokio::test]
async fn gemini_stream_closes_at_end_of_body() {
    let transport = MockTransport::queue(vec![Reply::sse(&[
        "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Once \"}]},\"index\":0}]}\r\n\r\n",
        "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"upon\"}]},\"finishReason\":\"STOP\",\"index\":0}],",
        "\"usageMetadata\":{\"promptTokenCount\":2,\"candidatesTokenCount\":2,\"totalTokenCount\":4}}",
    ])]);
    let provider = GoogleGeminiProvider::new(transport.clone() as DynHttpTransport, "g-test")
        .with_default_model("gemini-2.0-flash-lite");
    let model = ChatModel::new(Arc::new(provider));

    let chunks: Vec<_> = model.stream("Tell a story").await.unwrap().collect().await;
    let chunks: Vec<_> = chunks.into_iter().map(Result::unwrap).collect();
    let text: String = chunks.iter().map(|chunk| chunk.delta.as_str()).collect();
    assert_eq!(text, "Once upon");
    assert!(chunks.last().unwrap().is_terminal);
    assert!(transport.requests()[0].url.ends_with(":streamGenerateContent?alt=sse"));
}

#[tokio::test]
async fn batch_preserves_order_across_concurrent_calls() {
    let transport = MockTransport::responder(|request| {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let prompt = body["messages"][0]["content"].as_str().unwrap().to_uppercase();
        Reply::ok(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": prompt}, "finish_reason": "stop"}]
        }))
    });
    let configs = vec![
        ModelConfig::new("openai", Provider::OpenAi, "sk-test").with_default_model("gpt-5-nano"),
    ];
    let client = build_client_from_configs(&configs, transport.clone() as DynHttpTransport).unwrap();

    let replies = client
        .batch("openai", ["alpha", "beta", "gamma"])
        .await
        .unwrap();
    let contents: Vec<_> = replies.into_iter().map(|reply| reply.content).collect();
    assert_eq!(contents, ["ALPHA", "BETA", "GAMMA"]);
    assert_eq!(transport.requests().len(), 3);
}

#[tokio::test]
async fn token_limit_errors_are_classified() {
    let transport = MockTransport::queue(vec![Reply::status(
        400,
        Vec::new(),
        json!({"error": {
            "message": "This model's maximum context length is 128000 tokens.",
            "type": "invalid_request_error",
            "code": "context_length_exceeded"
        }}),
    )]);
    let configs = vec![
        ModelConfig::new("openai", Provider::OpenAi, "sk-test").with_default_model("gpt-5-nano"),
    ];
    let client = build_client_from_configs(&configs, transport as DynHttpTransport).unwrap();

    let err = client.invoke("openai", "a very long prompt").await.unwrap_err();
    assert!(matches!(err, LLMError::TokenLimitExceeded { .. }), "{err:?}");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn unknown_handle_is_rejected_before_any_request() {
    let transport = MockTransport::queue(Vec::new());
    let configs = vec![ModelConfig::new("gemini", Provider::Gemini, "g-test")];
    let client = build_client_from_configs(&configs, transport.clone() as DynHttpTransport).unwrap();

    let err = client.invoke("claude", "hi").await.unwrap_err();
    assert!(matches!(err, LLMError::Validation { .. }));
    assert!(transport.requests().is_empty());
}
