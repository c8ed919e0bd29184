//! Hugging Face inference provider.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use gifttest_core::error::ProviderError;
use gifttest_core::traits::{GenerateRequest, GenerateResponse, LlmProvider, ModelInfo};

use crate::config::ProviderKind;
use crate::http;

pub struct HuggingFaceProvider {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HuggingFaceProvider {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Self {
        let base_url =
            base_url.unwrap_or_else(|| ProviderKind::HuggingFace.default_base_url().to_string());
        Self {
            base_url: http::trim_base(&base_url),
            timeout,
            client: http::build_client(timeout),
        }
    }
}

#[derive(Serialize)]
struct InferenceRequest {
    inputs: String,
    parameters: InferenceParameters,
}

#[derive(Serialize)]
struct InferenceParameters {
    max_new_tokens: u32,
    temperature: f64,
    return_full_text: bool,
}

/// The endpoint answers with either a list of generations or a single object.
#[derive(Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    Many(Vec<Generation>),
    One(Generation),
}

#[derive(Deserialize)]
struct Generation {
    #[serde(default)]
    generated_text: Option<String>,
    #[serde(default)]
    summary_text: Option<String>,
}

impl Generation {
    fn into_text(self) -> Option<String> {
        self.generated_text.or(self.summary_text)
    }
}

#[async_trait]
impl LlmProvider for HuggingFaceProvider {
    fn name(&self) -> &str {
        "huggingface"
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
        let start = Instant::now();
        let model = match request.model.trim() {
            "" => ProviderKind::HuggingFace.default_model(),
            m => m,
        }
        .to_string();

        let inputs = match request.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(system) => format!("{system}\n\n{}", request.prompt),
            None => request.prompt.clone(),
        };
        let mut builder = self
            .client
            .post(format!("{}/models/{model}", self.base_url))
            .json(&InferenceRequest {
                inputs,
                parameters: InferenceParameters {
                    max_new_tokens: request.max_tokens,
                    temperature: request.temperature,
                    return_full_text: false,
                },
            });
        if let Some(key) = request.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| http::send_error(e, self.timeout))?;
        let response = http::check_status(response, &model).await?;

        let api_response: InferenceResponse = response.json().await.map_err(http::invalid_body)?;
        let text = match api_response {
            InferenceResponse::Many(items) => items.into_iter().next().and_then(Generation::into_text),
            InferenceResponse::One(item) => item.into_text(),
        };
        let content = text
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse("Hugging Face returned no text".into()))?;

        Ok(GenerateResponse {
            content,
            model,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        [
            ("meta-llama/Llama-3.1-8B-Instruct", "Llama 3.1 8B Instruct", 131_072),
            ("mistralai/Mistral-7B-Instruct-v0.3", "Mistral 7B Instruct v0.3", 32_768),
            ("Qwen/Qwen2.5-7B-Instruct", "Qwen 2.5 7B Instruct", 32_768),
        ]
        .into_iter()
        .map(|(id, name, max_context)| ModelInfo {
            id: id.into(),
            name: name.into(),
            provider: "huggingface".into(),
            max_context,
        })
        .collect()
    }

    fn default_model(&self) -> &str {
        ProviderKind::HuggingFace.default_model()
    }

    fn requires_api_key(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(api_key: Option<&str>) -> GenerateRequest {
        GenerateRequest {
            model: "meta-llama/Llama-3.1-8B-Instruct".into(),
            api_key: api_key.map(Into::into),
            system_prompt: None,
            prompt: "Explain".into(),
            max_tokens: 128,
            temperature: 0.2,
        }
    }

    #[tokio::test]
    async fn list_and_object_responses() {
        for body in [
            serde_json::json!([{"generated_text": "From a list."}]),
            serde_json::json!({"generated_text": "From a list."}),
        ] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/models/meta-llama/Llama-3.1-8B-Instruct"))
                .respond_with(ResponseTemplate::new(200).set_body_json(&body))
                .mount(&server)
                .await;

            let provider = HuggingFaceProvider::new(Some(server.uri()), Duration::from_secs(5));
            let response = provider.generate(&request(None)).await.unwrap();
            assert_eq!(response.content, "From a list.");
        }
    }

    #[tokio::test]
    async fn key_is_sent_when_present() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(wiremock::matchers::header("Authorization", "Bearer hf-key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!([{"summary_text": "ok"}])),
            )
            .mount(&server)
            .await;

        let provider = HuggingFaceProvider::new(Some(server.uri()), Duration::from_secs(5));
        assert_eq!(provider.generate(&request(Some("hf-key"))).await.unwrap().content, "ok");
        assert!(!provider.requires_api_key());
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("loading"))
            .mount(&server)
            .await;

        let provider = HuggingFaceProvider::new(Some(server.uri()), Duration::from_secs(5));
        let err = provider.generate(&request(None)).await.unwrap_err();
        assert!(err.downcast_ref::<ProviderError>().unwrap().is_retryable());
    }
}
