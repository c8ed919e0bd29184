//! Explanation orchestration: cache lookup, request coalescing, timeout and retry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

use crate::cache::{prompt_hash, CacheEntry, CacheKey, ExplanationCache};
use crate::error::{ExplainError, PersistenceError, ProviderError};
use crate::model::{Question, QuestionId};
use crate::traits::{
    build_prompt, GenerateRequest, LlmProvider, DEFAULT_MAX_TOKENS, DEFAULT_PROMPT_TEMPLATE,
    DEFAULT_SYSTEM_PROMPT, DEFAULT_TEMPERATURE,
};

/// Attempts per request: the first call plus one retry.
const MAX_ATTEMPTS: u32 = 2;

/// Per-call settings for [`ExplanationService::explain`].
#[derive(Clone)]
pub struct ExplainConfig {
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub system_prompt: String,
    pub prompt_template: String,
    /// Bound on a single provider call.
    pub timeout: Duration,
    /// Delay before the retry when the provider gives no hint.
    pub retry_delay: Duration,
    /// Upper bound on any retry delay, including provider hints.
    pub max_retry_delay: Duration,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl ExplainConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            api_key: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            timeout: Duration::from_secs(60),
            retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(10),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

impl std::fmt::Debug for ExplainConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExplainConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("timeout", &self.timeout)
            .field("max_retry_delay", &self.max_retry_delay)
            .finish_non_exhaustive()
    }
}

/// Generated (or cached) explanation text.
#[derive(Debug)]
pub struct Explanation {
    pub text: String,
    /// Generation time of the original request, also for cache hits.
    pub elapsed_ms: u64,
    pub generated_at: DateTime<Utc>,
    pub from_cache: bool,
    /// Set when the text was generated but could not be written to the cache file.
    pub persist_error: Option<PersistenceError>,
}

impl Explanation {
    fn cached(entry: CacheEntry) -> Self {
        Self {
            text: entry.text,
            elapsed_ms: entry.elapsed_ms,
            generated_at: entry.generated_at,
            from_cache: true,
            persist_error: None,
        }
    }
}

type Slot = Arc<AsyncMutex<()>>;

/// Turns questions into explanations through the configured providers.
///
/// Cheap to share behind an `Arc`; concurrent requests for the same cache key
/// result in a single provider call.
pub struct ExplanationService {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    cache: ExplanationCache,
    in_flight: Mutex<HashMap<CacheKey, Slot>>,
}

impl ExplanationService {
    pub fn new(providers: HashMap<String, Arc<dyn LlmProvider>>, cache: ExplanationCache) -> Self {
        Self {
            providers,
            cache,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Add a provider under its own name, replacing any previous one.
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn provider(&self, name: &str) -> Option<&Arc<dyn LlmProvider>> {
        self.providers.get(name)
    }

    pub fn cache(&self) -> &ExplanationCache {
        &self.cache
    }

    /// Number of cache keys with a request currently running or waiting.
    pub fn pending_requests(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[tracing::instrument(
        skip(self, question, config),
        fields(question = %question.id, provider = %config.provider, model = %config.model)
    )]
    pub async fn explain(
        &self,
        question: &Question,
        config: &ExplainConfig,
    ) -> Result<Explanation, ExplainError> {
        let provider = self
            .providers
            .get(&config.provider)
            .cloned()
            .ok_or_else(|| ExplainError::UnknownProvider(config.provider.clone()))?;
        if config.prompt_template.trim().is_empty() {
            return Err(ExplainError::EmptyPrompt);
        }

        let key = CacheKey::new(
            question,
            &prompt_hash(&config.system_prompt, &config.prompt_template),
            &config.provider,
            &config.model,
        );
        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!("explanation cache hit");
            return Ok(Explanation::cached(hit));
        }

        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty());
        if provider.requires_api_key() && api_key.is_none() {
            return Err(ExplainError::MissingApiKey(config.provider.clone()));
        }

        let flight = self.join_flight(&key);
        let _turn = flight.slot.lock().await;

        // Another caller may have generated it while we waited.
        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!("explanation produced by a concurrent request");
            return Ok(Explanation::cached(hit));
        }

        let request = GenerateRequest {
            model: config.model.clone(),
            api_key: api_key.map(str::to_string),
            system_prompt: Some(config.system_prompt.clone()).filter(|s| !s.trim().is_empty()),
            prompt: build_prompt(&config.prompt_template, question),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        };

        let started = Instant::now();
        let text = generate_with_retry(provider.as_ref(), &request, config).await?;
        let entry = CacheEntry {
            text,
            generated_at: Utc::now(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        let persist_error = self.cache.insert(key, entry.clone()).err();
        if let Some(e) = &persist_error {
            tracing::warn!("explanation generated but not persisted: {e}");
        }
        tracing::info!(elapsed_ms = entry.elapsed_ms, "explanation generated");

        Ok(Explanation {
            text: entry.text,
            elapsed_ms: entry.elapsed_ms,
            generated_at: entry.generated_at,
            from_cache: false,
            persist_error,
        })
    }

    /// Run [`explain`](Self::explain) as an independent task that can be cancelled.
    pub fn spawn_explain(self: &Arc<Self>, question: Question, config: ExplainConfig) -> ExplanationTask {
        let service = Arc::clone(self);
        let question_id = question.id;
        let handle = tokio::spawn(async move { service.explain(&question, &config).await });
        ExplanationTask {
            question_id,
            handle,
        }
    }

    /// Generate explanations for many questions, at most `parallelism` at a time.
    ///
    /// Results arrive in completion order.
    pub async fn prefetch(
        &self,
        questions: &[&Question],
        config: &ExplainConfig,
        parallelism: usize,
    ) -> Vec<(QuestionId, Result<Explanation, ExplainError>)> {
        let semaphore = Semaphore::new(parallelism.max(1));
        let mut pending = FuturesUnordered::new();
        for &question in questions {
            let semaphore = &semaphore;
            pending.push(async move {
                let _permit = semaphore.acquire().await;
                (question.id, self.explain(question, config).await)
            });
        }

        let mut results = Vec::with_capacity(questions.len());
        while let Some(result) = pending.next().await {
            if let Err(e) = &result.1 {
                tracing::warn!(question = %result.0, "prefetch failed: {e}");
            }
            results.push(result);
        }
        results
    }

    fn join_flight(&self, key: &CacheKey) -> Flight<'_> {
        let mut map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = Arc::clone(map.entry(key.clone()).or_default());
        Flight {
            map: &self.in_flight,
            key: key.clone(),
            slot,
        }
    }
}

/// Membership in the per-key lock map. The slot is removed by the last member
/// to leave, whether it finished, failed or was cancelled.
struct Flight<'a> {
    map: &'a Mutex<HashMap<CacheKey, Slot>>,
    key: CacheKey,
    slot: Slot,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here.
        if Arc::strong_count(&self.slot) <= 2 {
            map.remove(&self.key);
        }
    }
}

async fn generate_with_retry(
    provider: &dyn LlmProvider,
    request: &GenerateRequest,
    config: &ExplainConfig,
) -> Result<String, ExplainError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout(config.timeout, provider.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(config.timeout.as_secs()).into()),
        };

        let err = match outcome {
            Ok(response) if !response.content.trim().is_empty() => return Ok(response.content),
            Ok(_) => ProviderError::InvalidResponse("empty explanation".into()),
            Err(e) => match e.downcast_ref::<ProviderError>() {
                Some(provider_err) => provider_err.clone(),
                None => return Err(ExplainError::Other(e)),
            },
        };

        if err.is_permanent() || attempt >= MAX_ATTEMPTS {
            return Err(ExplainError::Provider {
                attempts: attempt,
                source: err,
            });
        }

        let delay = err
            .retry_after_ms()
            .map(Duration::from_millis)
            .unwrap_or(config.retry_delay)
            .min(config.max_retry_delay);
        tracing::warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "transient provider error, retrying: {err}"
        );
        tokio::time::sleep(delay).await;
    }
}

/// A background explanation request.
#[derive(Debug)]
pub struct ExplanationTask {
    question_id: QuestionId,
    handle: JoinHandle<Result<Explanation, ExplainError>>,
}

impl ExplanationTask {
    pub fn question_id(&self) -> QuestionId {
        self.question_id
    }

    /// Stop waiting for the result. The per-key lock is released; a request
    /// already sent to the provider may still complete there.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// A handle that cancels the task after [`wait`](Self::wait) has taken ownership.
    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.abort_handle()
    }

    pub async fn wait(self) -> Result<Explanation, ExplainError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(ExplainError::Cancelled),
            Err(e) => Err(ExplainError::Other(anyhow::anyhow!(
                "explanation task failed: {e}"
            ))),
        }
    }
}
