use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::LLMError;
use crate::logging::short_type_name;
use crate::model::{ChatModel, Prompt, RetryPolicy};
use crate::provider::{ChatStream, DynProvider};
use crate::types::{ChatRequest, ChatResponse};
use crate::usage::{UsageSummary, UsageTracker};

/// Entry point holding one [`ChatModel`] per registered handle.
pub struct LLMClient {
    models: HashMap<String, ChatModel>,
    tracker: Option<Arc<UsageTracker>>,
}

impl LLMClient {
    pub fn builder() -> LLMClientBuilder {
        LLMClientBuilder::default()
    }

    /// Sends `prompt` to the model registered under `handle`.
    pub async fn invoke(
        &self,
        handle: &str,
        prompt: impl Into<Prompt>,
    ) -> Result<ChatResponse, LLMError> {
        self.get_model(handle)?.invoke(prompt).await
    }

    /// Sends a full request to the model registered under `handle`.
    pub async fn chat(&self, handle: &str, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        self.get_model(handle)?.chat(request).await
    }

    pub async fn stream(
        &self,
        handle: &str,
        prompt: impl Into<Prompt>,
    ) -> Result<ChatStream, LLMError> {
        self.get_model(handle)?.stream(prompt).await
    }

    pub async fn stream_chat(
        &self,
        handle: &str,
        request: ChatRequest,
    ) -> Result<ChatStream, LLMError> {
        self.get_model(handle)?.stream_chat(request).await
    }

    /// Runs every prompt against `handle` concurrently; replies keep input order.
    pub async fn batch<P, I>(&self, handle: &str, prompts: I) -> Result<Vec<ChatResponse>, LLMError>
    where
        P: Into<Prompt>,
        I: IntoIterator<Item = P>,
    {
        self.get_model(handle)?.batch(prompts).await
    }

    /// Registered handles in sorted order.
    pub fn handles(&self) -> Vec<String> {
        let mut handles: Vec<String> = self.models.keys().cloned().collect();
        handles.sort();
        handles
    }

    pub fn model(&self, handle: &str) -> Option<&ChatModel> {
        self.models.get(handle)
    }

    /// Usage accumulated by the client-wide tracker, if one was configured.
    pub fn usage(&self) -> Option<UsageSummary> {
        self.tracker.as_ref().map(|tracker| tracker.summary())
    }

    fn get_model(&self, handle: &str) -> Result<&ChatModel, LLMError> {
        let model = self.models.get(handle).ok_or_else(|| LLMError::Validation {
            message: format!("unknown model handle: {handle}"),
        })?;
        debug!(
            context = short_type_name::<Self>(),
            handle,
            provider = model.provider().name(),
            "dispatching request"
        );
        Ok(model)
    }
}

/// Collects handles before building an [`LLMClient`].
///
/// A retry policy set here replaces the policy of every registered model. A usage
/// tracker set here is attached to every model that does not carry its own.
#[derive(Default)]
pub struct LLMClientBuilder {
    models: HashMap<String, ChatModel>,
    retry: Option<RetryPolicy>,
    tracker: Option<Arc<UsageTracker>>,
}

impl LLMClientBuilder {
    /// Registers `provider` with default options under `handle`.
    pub fn register_handle<S: Into<String>>(self, handle: S, provider: DynProvider) -> Self {
        self.register_model(handle, ChatModel::new(provider))
    }

    /// Registers a configured model under `handle`, replacing any previous one.
    pub fn register_model<S: Into<String>>(mut self, handle: S, model: ChatModel) -> Self {
        self.models.insert(handle.into(), model);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Shares `tracker` across all registered models.
    pub fn with_usage_tracker(mut self, tracker: Arc<UsageTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn build(self) -> LLMClient {
        let Self {
            models,
            retry,
            tracker,
        } = self;
        let models = models
            .into_iter()
            .map(|(handle, mut model)| {
                if let Some(retry) = &retry {
                    model = model.with_retry_policy(retry.clone());
                }
                match &tracker {
                    Some(tracker) if model.tracker().is_none() => {
                        model = model.with_tracker(tracker.clone());
                    }
                    _ => {}
                }
                (handle, model)
            })
            .collect();
        LLMClient { models, tracker }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::LLMProvider;
    use crate::types::{ProviderMetadata, TokenUsage};
    use async_trait::async_trait;

    /// Answers every request with the provider's name.
    struct NamedProvider {
        name: &'static str,
    }

    #[async_trait]
    impl LLMProvider for NamedProvider {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, LLMError> {
            Ok(ChatResponse {
                content: self.name.to_string(),
                usage: Some(TokenUsage::new(10, 10)),
                finish_reason: None,
                model: Some(self.name.to_string()),
                provider: ProviderMetadata::default(),
            })
        }

        async fn stream_chat(&self, _request: ChatRequest) -> Result<ChatStream, LLMError> {
            Err(LLMError::StreamClosed {
                message: "streaming not scripted".to_string(),
            })
        }

        fn name(&self) -> &'static str {
            self.name
        }
    }

    fn client() -> LLMClient {
        LLMClient::builder()
            .register_handle("fast", Arc::new(NamedProvider { name: "p1" }) as DynProvider)
            .register_handle("smart", Arc::new(NamedProvider { name: "p2" }) as DynProvider)
            .with_usage_tracker(Arc::new(UsageTracker::new()))
            .with_retry_policy(RetryPolicy::none())
            .build()
    }

    #[tokio::test]
    async fn routes_by_handle() {
        let client = client();
        assert_eq!(client.invoke("fast", "hi").await.unwrap().content, "p1");
        assert_eq!(client.invoke("smart", "hi").await.unwrap().content, "p2");
        assert_eq!(client.handles(), vec!["fast".to_string(), "smart".to_string()]);
        assert_eq!(client.model("fast").unwrap().retry_policy().max_retries, 0);
    }

    #[tokio::test]
    async fn unknown_handle_is_validation_error() {
        let client = client();
        let err = client.invoke("missing", "hi").await.unwrap_err();
        match err {
            LLMError::Validation { message } => assert!(message.contains("missing")),
            other => panic!("unexpected error type: {other:?}"),
        }
        assert!(client.model("missing").is_none());
    }

    #[tokio::test]
    async fn shared_tracker_sees_all_handles() {
        let client = client();
        client.batch("fast", ["a", "b"]).await.unwrap();
        client.invoke("smart", "c").await.unwrap();
        let usage = client.usage().unwrap();
        assert_eq!(usage.calls, 3);
        assert_eq!(usage.total_tokens, 60);
        assert_eq!(usage.by_model["p1"].calls, 2);
    }

    #[test]
    fn client_without_tracker_reports_no_usage() {
        let client = LLMClient::builder()
            .register_handle("only", Arc::new(NamedProvider { name: "p" }) as DynProvider)
            .build();
        assert!(client.usage().is_none());
    }

    #[test]
    fn builder_policy_replaces_model_policy_but_tracker_does_not() {
        let own = Arc::new(UsageTracker::new());
        let shared = Arc::new(UsageTracker::new());
        let model = ChatModel::new(Arc::new(NamedProvider { name: "p" }))
            .with_retry_policy(RetryPolicy::new(7))
            .with_tracker(own.clone());
        let client = LLMClient::builder()
            .register_model("tuned", model)
            .with_retry_policy(RetryPolicy::none())
            .with_usage_tracker(shared)
            .build();

        let tuned = client.model("tuned").unwrap();
        assert_eq!(tuned.retry_policy().max_retries, 0);
        assert!(Arc::ptr_eq(tuned.tracker().unwrap(), &own));
    }
}
