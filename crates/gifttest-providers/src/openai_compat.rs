//! OpenAI-compatible chat completions: Groq, Mistral, Perplexity, OpenRouter, OpenAI.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use gifttest_core::error::ProviderError;
use gifttest_core::traits::{GenerateRequest, GenerateResponse, LlmProvider, ModelInfo};

use crate::config::ProviderKind;
use crate::http;

const PERPLEXITY_MODELS: [&str; 4] = ["sonar", "sonar-pro", "sonar-deep-research", "sonar-reasoning-pro"];

/// Chat completions client for any provider speaking the OpenAI wire format.
pub struct OpenAiCompatProvider {
    kind: ProviderKind,
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// `kind` must be one of the chat-completions providers.
    pub fn new(kind: ProviderKind, base_url: Option<String>, timeout: Duration) -> Self {
        let base_url = base_url.unwrap_or_else(|| kind.default_base_url().to_string());
        Self {
            kind,
            base_url: http::trim_base(&base_url),
            timeout,
            client: http::build_client(timeout),
        }
    }

    fn resolve_model(&self, model: &str) -> String {
        let model = model.trim();
        let model = if model.is_empty() {
            self.kind.default_model()
        } else {
            model
        };
        match self.kind {
            ProviderKind::Perplexity => normalize_perplexity_model(model).to_string(),
            _ => model.to_string(),
        }
    }
}

/// Map legacy Perplexity model ids onto the current Sonar catalog.
pub fn normalize_perplexity_model(model: &str) -> &'static str {
    let lower = model.trim().to_ascii_lowercase();
    if let Some(known) = PERPLEXITY_MODELS.iter().find(|m| **m == lower) {
        return *known;
    }
    match lower.as_str() {
        "llama-3.1-sonar-small-128k-online" => "sonar",
        "llama-3.1-sonar-large-128k-online" | "llama-3.1-sonar-huge-128k-online" => "sonar-pro",
        l if l.contains("reason") => "sonar-reasoning-pro",
        l if l.contains("deep") || l.contains("research") => "sonar-deep-research",
        _ => "sonar-pro",
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: String,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    #[instrument(skip(self, request), fields(provider = self.kind.as_str(), model = %request.model))]
    async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
        let start = Instant::now();
        let api_key = http::require_key(request, self.kind.as_str())?;
        let model = self.resolve_model(&request.model);

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let body = ChatRequest {
            model: model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| http::send_error(e, self.timeout))?;
        let response = http::check_status(response, &model).await?;

        let api_response: ChatResponse = response.json().await.map_err(http::invalid_body)?;
        let content = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse("response has no message content".into()))?;

        Ok(GenerateResponse {
            content,
            model: api_response.model.unwrap_or(model),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        let models: &[(&str, &str, u32)] = match self.kind {
            ProviderKind::Groq => &[
                ("llama-3.3-70b-versatile", "Llama 3.3 70B Versatile", 131_072),
                ("llama-3.1-8b-instant", "Llama 3.1 8B Instant", 131_072),
                ("gemma2-9b-it", "Gemma 2 9B", 8_192),
            ],
            ProviderKind::Mistral => &[
                ("mistral-small-latest", "Mistral Small", 32_000),
                ("mistral-medium-latest", "Mistral Medium", 128_000),
                ("mistral-large-latest", "Mistral Large", 128_000),
                ("open-mistral-nemo", "Mistral Nemo", 128_000),
            ],
            ProviderKind::Perplexity => &[
                ("sonar", "Sonar", 127_072),
                ("sonar-pro", "Sonar Pro", 200_000),
                ("sonar-deep-research", "Sonar Deep Research", 128_000),
                ("sonar-reasoning-pro", "Sonar Reasoning Pro", 128_000),
            ],
            ProviderKind::OpenRouter => &[
                ("meta-llama/Meta-Llama-3.1-8B-Instruct", "Llama 3.1 8B Instruct", 131_072),
                ("mistralai/mistral-7b-instruct", "Mistral 7B Instruct", 32_768),
                ("google/gemma-2-9b-it", "Gemma 2 9B", 8_192),
            ],
            _ => &[
                ("gpt-4.1-mini", "GPT-4.1 Mini", 1_000_000),
                ("gpt-4.1", "GPT-4.1", 1_000_000),
                ("gpt-4.1-nano", "GPT-4.1 Nano", 1_000_000),
            ],
        };
        models
            .iter()
            .map(|(id, name, max_context)| ModelInfo {
                id: (*id).into(),
                name: (*name).into(),
                provider: self.kind.as_str().into(),
                max_context: *max_context,
            })
            .collect()
    }

    fn default_model(&self) -> &str {
        self.kind.default_model()
    }
}
