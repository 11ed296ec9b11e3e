//! A provider bound to default options, a retry policy and usage tracking.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::try_join_all;
use tracing::{debug, instrument, warn};

use crate::error::LLMError;
use crate::logging::short_type_name;
use crate::provider::{ChatStream, DynProvider};
use crate::types::{ChatOptions, ChatRequest, ChatResponse, Message, TokenUsage};
use crate::usage::UsageTracker;

/// Input accepted by [`ChatModel::invoke`]: a bare string becomes one user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt(Vec<Message>);

impl Prompt {
    pub fn messages(&self) -> &[Message] {
        &self.0
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.0
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Self(vec![Message::user(text)])
    }
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Self(vec![Message::user(text)])
    }
}

impl From<Message> for Prompt {
    fn from(message: Message) -> Self {
        Self(vec![message])
    }
}

impl From<Vec<Message>> for Prompt {
    fn from(messages: Vec<Message>) -> Self {
        Self(messages)
    }
}

/// How often and how patiently a failed call is re-sent.
///
/// Only errors for which [`LLMError::is_retryable`] holds are retried. The delay
/// doubles from `base_delay` on each attempt, or follows the provider's
/// `Retry-After` when present, and never exceeds `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Wait before retry number `attempt` (zero-based) after `error`.
    pub fn delay_for(&self, attempt: u32, error: &LLMError) -> Duration {
        let delay = error
            .retry_after()
            .unwrap_or_else(|| self.base_delay.saturating_mul(1 << attempt.min(16)));
        delay.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Callable chat model.
///
/// Cloning is cheap; clones share the provider and the usage tracker.
#[derive(Clone)]
pub struct ChatModel {
    provider: DynProvider,
    options: ChatOptions,
    retry: RetryPolicy,
    tracker: Option<Arc<UsageTracker>>,
}

impl ChatModel {
    pub fn new(provider: DynProvider) -> Self {
        Self {
            provider,
            options: ChatOptions::default(),
            retry: RetryPolicy::default(),
            tracker: None,
        }
    }

    /// Options applied to every request unless the request sets its own.
    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.options.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = Some(temperature);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<UsageTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    pub fn options(&self) -> &ChatOptions {
        &self.options
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn tracker(&self) -> Option<&Arc<UsageTracker>> {
        self.tracker.as_ref()
    }

    /// Sends `prompt` and waits for the complete reply.
    pub async fn invoke(&self, prompt: impl Into<Prompt>) -> Result<ChatResponse, LLMError> {
        self.chat(ChatRequest::new(prompt.into().into_messages()))
            .await
    }

    /// Sends a full request; its options take precedence over the model defaults.
    #[instrument(name = "invoke", skip_all, fields(provider = self.provider.name()))]
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let request = self.prepare(request);
        let response = self
            .with_retries(|| self.provider.chat(request.clone()))
            .await?;
        if let Some(usage) = &response.usage {
            let label = response
                .model
                .clone()
                .unwrap_or_else(|| self.usage_label(&request));
            self.record_usage(&label, usage);
        }
        Ok(response)
    }

    /// Streams the reply to `prompt`.
    ///
    /// Only opening the stream is retried; errors inside the stream end it.
    pub async fn stream(&self, prompt: impl Into<Prompt>) -> Result<ChatStream, LLMError> {
        self.stream_chat(ChatRequest::new(prompt.into().into_messages()))
            .await
    }

    #[instrument(name = "stream", skip_all, fields(provider = self.provider.name()))]
    pub async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let request = self.prepare(request);
        let stream = self
            .with_retries(|| self.provider.stream_chat(request.clone()))
            .await?;
        let Some(tracker) = self.tracker.clone() else {
            return Ok(stream);
        };

        let label = self.usage_label(&request);
        let mut usage: Option<TokenUsage> = None;
        let mut recorded = false;
        Ok(Box::pin(stream.inspect(move |item| {
            let Ok(chunk) = item else { return };
            if let Some(chunk_usage) = &chunk.usage {
                usage.get_or_insert_with(TokenUsage::default).merge(chunk_usage);
            }
            if chunk.is_terminal && !recorded {
                recorded = true;
                if let Some(usage) = &usage {
                    tracker.record(&label, usage);
                }
            }
        })))
    }

    /// Sends every prompt concurrently and returns the replies in input order.
    ///
    /// The first failure fails the whole batch.
    #[instrument(name = "batch", skip_all, fields(provider = self.provider.name()))]
    pub async fn batch<P, I>(&self, prompts: I) -> Result<Vec<ChatResponse>, LLMError>
    where
        P: Into<Prompt>,
        I: IntoIterator<Item = P>,
    {
        let calls: Vec<_> = prompts
            .into_iter()
            .map(|prompt| self.invoke(prompt))
            .collect();
        debug!(
            context = short_type_name::<Self>(),
            size = calls.len(),
            "dispatching batch"
        );
        try_join_all(calls).await
    }

    fn prepare(&self, mut request: ChatRequest) -> ChatRequest {
        request.options = request.options.merged_over(&self.options);
        request
    }

    /// Model a request is billed under: its own, else the provider default.
    fn usage_label(&self, request: &ChatRequest) -> String {
        request
            .options
            .model
            .as_deref()
            .or_else(|| self.provider.default_model())
            .unwrap_or_else(|| self.provider.name())
            .to_string()
    }

    fn record_usage(&self, label: &str, usage: &TokenUsage) {
        if let Some(tracker) = &self.tracker {
            tracker.record(label, usage);
        }
    }

    async fn with_retries<T, F, Fut>(&self, mut call: F) -> Result<T, LLMError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LLMError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt, &err);
                    warn!(
                        context = short_type_name::<Self>(),
                        attempt = attempt + 1,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures_util::stream;

    use super::*;
    use crate::provider::LLMProvider;
    use crate::types::{ChatChunk, ProviderMetadata};

    /// Replays canned results and records the requests it saw.
    struct ScriptedProvider {
        replies: Mutex<VecDeque<Result<ChatResponse, LLMError>>>,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<ChatResponse, LLMError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    fn reply(content: &str, usage: Option<TokenUsage>) -> ChatResponse {
        ChatResponse {
            content: content.to_string(),
            usage,
            finish_reason: None,
            model: Some("gpt-5-nano-2025-08-07".to_string()),
            provider: ProviderMetadata::default(),
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
            self.seen.lock().unwrap().push(request.clone());
            match self.replies.lock().unwrap().pop_front() {
                Some(result) => result,
                // Batch calls share the script; echo the prompt once it runs dry.
                None => Ok(reply(&request.messages[0].content, None)),
            }
        }

        async fn stream_chat(&self, _request: ChatRequest) -> Result<ChatStream, LLMError> {
            let meta = ProviderMetadata::default();
            let chunks = vec![
                Ok(ChatChunk {
                    delta: "Hel".to_string(),
                    finish_reason: None,
                    usage: None,
                    is_terminal: false,
                    provider: meta.clone(),
                }),
                Ok(ChatChunk {
                    delta: "lo".to_string(),
                    finish_reason: None,
                    usage: Some(TokenUsage::new(4, 2)),
                    is_terminal: false,
                    provider: meta.clone(),
                }),
                Ok(ChatChunk::terminal(meta)),
            ];
            Ok(Box::pin(stream::iter(chunks)))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn fast_retries(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries).with_base_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn invoke_merges_defaults_and_records_usage() {
        let provider = ScriptedProvider::new(vec![Ok(reply("hi", Some(TokenUsage::new(1000, 0))))]);
        let tracker = Arc::new(UsageTracker::new());
        let model = ChatModel::new(provider.clone())
            .with_model("gpt-5-nano")
            .with_temperature(1.0)
            .with_tracker(tracker.clone());

        let response = model.invoke("hello").await.unwrap();
        assert_eq!(response.content, "hi");

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen[0].messages, vec![Message::user("hello")]);
        assert_eq!(seen[0].options.model.as_deref(), Some("gpt-5-nano"));
        assert_eq!(seen[0].options.temperature, Some(1.0));

        let summary = tracker.summary();
        assert_eq!(summary.calls, 1);
        assert_eq!(summary.estimated_cost_usd, 0.05);
        assert!(summary.by_model.contains_key("gpt-5-nano-2025-08-07"));
    }

    #[tokio::test]
    async fn retryable_errors_are_retried_until_success() {
        let provider = ScriptedProvider::new(vec![
            Err(LLMError::RateLimit {
                message: "slow down".to_string(),
                retry_after: Some(Duration::from_millis(1)),
            }),
            Err(LLMError::transport("connection reset")),
            Ok(reply("third time", None)),
        ]);
        let model = ChatModel::new(provider.clone()).with_retry_policy(fast_retries(2));

        let response = model.invoke("again").await.unwrap();
        assert_eq!(response.content, "third time");
        assert_eq!(provider.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn retries_stop_at_policy_limit_and_skip_permanent_errors() {
        let provider = ScriptedProvider::new(vec![
            Err(LLMError::transport("down")),
            Err(LLMError::transport("still down")),
        ]);
        let model = ChatModel::new(provider.clone()).with_retry_policy(fast_retries(1));
        let err = model.invoke("x").await.unwrap_err();
        assert!(matches!(err, LLMError::Transport { message } if message == "still down"));

        let provider = ScriptedProvider::new(vec![Err(LLMError::Auth {
            message: "bad key".to_string(),
        })]);
        let model = ChatModel::new(provider.clone()).with_retry_policy(fast_retries(3));
        assert!(matches!(
            model.invoke("x").await,
            Err(LLMError::Auth { .. })
        ));
        assert_eq!(provider.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn batch_keeps_input_order() {
        let provider = ScriptedProvider::new(Vec::new());
        let model = ChatModel::new(provider);
        let replies = model.batch(["one", "two", "three"]).await.unwrap();
        let contents: Vec<_> = replies.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, ["one", "two", "three"]);
    }

    #[tokio::test]
    async fn batch_fails_on_first_error() {
        let provider = ScriptedProvider::new(vec![Err(LLMError::Validation {
            message: "empty".to_string(),
        })]);
        let model = ChatModel::new(provider).with_retry_policy(RetryPolicy::none());
        assert!(matches!(
            model.batch(vec!["a".to_string(), "b".to_string()]).await,
            Err(LLMError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn stream_records_usage_at_terminal_chunk() {
        let tracker = Arc::new(UsageTracker::new());
        let model = ChatModel::new(ScriptedProvider::new(Vec::new()))
            .with_model("claude-3-haiku-20240307")
            .with_tracker(tracker.clone());

        let mut stream = model.stream("hi").await.unwrap();
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            text.push_str(&chunk.unwrap().delta);
        }
        assert_eq!(text, "Hello");

        let summary = tracker.summary();
        assert_eq!(summary.calls, 1);
        assert_eq!(summary.by_model["claude-3-haiku-20240307"].total_tokens, 6);
    }

    #[test]
    fn retry_delay_doubles_and_respects_caps() {
        let policy = RetryPolicy::new(5)
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(1));
        let err = LLMError::transport("x");
        assert_eq!(policy.delay_for(0, &err), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, &err), Duration::from_millis(400));
        assert_eq!(policy.delay_for(10, &err), Duration::from_secs(1));

        let limited = LLMError::RateLimit {
            message: "wait".to_string(),
            retry_after: Some(Duration::from_millis(250)),
        };
        assert_eq!(policy.delay_for(3, &limited), Duration::from_millis(250));
    }

    #[test]
    fn prompts_convert_from_common_inputs() {
        assert_eq!(Prompt::from("a").messages(), [Message::user("a")]);
        assert_eq!(
            Prompt::from(Message::system("s")).messages(),
            [Message::system("s")]
        );
        let history = vec![Message::user("q"), Message::assistant("a")];
        assert_eq!(Prompt::from(history.clone()).into_messages(), history);
    }
}
