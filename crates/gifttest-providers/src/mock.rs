//! Mock provider for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use gifttest_core::error::ProviderError;
use gifttest_core::traits::{GenerateRequest, GenerateResponse, LlmProvider, ModelInfo};

/// Offline provider for exercising explanations.
///
/// The first response whose key occurs in the prompt wins; otherwise the
/// default text is returned. Scripted failures are consumed first, one per call.
pub struct MockProvider {
    responses: HashMap<String, String>,
    default_response: String,
    failures: Mutex<VecDeque<ProviderError>>,
    delay: Option<Duration>,
    call_count: AtomicU32,
    last_request: Mutex<Option<GenerateRequest>>,
}

impl MockProvider {
    /// Answers keyed by a substring of the prompt.
    pub fn new(responses: HashMap<String, String>) -> Self {
        Self {
            responses,
            default_response: "Explicação de teste.".to_string(),
            failures: Mutex::new(VecDeque::new()),
            delay: None,
            call_count: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Always answers with `response`.
    pub fn with_fixed_response(response: &str) -> Self {
        let mut mock = Self::new(HashMap::new());
        mock.default_response = response.to_string();
        mock
    }

    /// The canned backend behind the `mock` provider kind.
    pub fn explainer() -> Self {
        Self::new(HashMap::new())
    }

    /// Fail the next calls with these errors, in order.
    pub fn with_failures(self, failures: impl IntoIterator<Item = ProviderError>) -> Self {
        *self.failures.lock().unwrap_or_else(PoisonError::into_inner) =
            failures.into_iter().collect();
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn last_request(&self) -> Option<GenerateRequest> {
        self.last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        *self
            .last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(err) = failure {
            return Err(err.into());
        }

        let content = self
            .responses
            .iter()
            .find(|(key, _)| request.prompt.contains(key.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| self.default_response.clone());

        Ok(GenerateResponse {
            content,
            model: request.model.clone(),
            latency_ms: self.delay.map_or(1, |d| d.as_millis() as u64),
        })
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        vec![ModelInfo {
            id: "mock-model".into(),
            name: "Mock Model".into(),
            provider: "mock".into(),
            max_context: 100_000,
        }]
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }

    fn requires_api_key(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> GenerateRequest {
        GenerateRequest {
            model: "mock-model".into(),
            api_key: None,
            system_prompt: None,
            prompt: prompt.into(),
            max_tokens: 100,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn always_the_same_text() {
        let provider = MockProvider::with_fixed_response("A resposta certa é B.");
        let response = provider.generate(&request("anything")).await.unwrap();
        assert_eq!(response.content, "A resposta certa é B.");
        assert_eq!(provider.call_count(), 1);
        assert_eq!(provider.last_request().unwrap().prompt, "anything");
    }

    #[tokio::test]
    async fn keys_select_by_prompt_substring() {
        let mut responses = HashMap::new();
        responses.insert("capital".to_string(), "Lisboa.".to_string());
        responses.insert("rio".to_string(), "Tejo.".to_string());
        let provider = MockProvider::new(responses);

        let capital = provider.generate(&request("Qual é a capital?")).await.unwrap();
        assert_eq!(capital.content, "Lisboa.");
        let other = provider.generate(&request("Outra pergunta")).await.unwrap();
        assert_eq!(other.content, "Explicação de teste.");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn scripted_failures_come_first() {
        let provider = MockProvider::with_fixed_response("ok")
            .with_failures([ProviderError::RateLimited { retry_after_ms: 10 }]);

        let err = provider.generate(&request("p")).await.unwrap_err();
        assert!(err.downcast_ref::<ProviderError>().unwrap().is_retryable());
        assert_eq!(provider.generate(&request("p")).await.unwrap().content, "ok");
    }

    #[test]
    fn needs_no_key() {
        assert!(!MockProvider::explainer().requires_api_key());
    }
}
