//! Google Gemini `generateContent` provider.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use gifttest_core::error::ProviderError;
use gifttest_core::traits::{GenerateRequest, GenerateResponse, LlmProvider, ModelInfo};

use crate::config::ProviderKind;
use crate::http;

pub struct GeminiProvider {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Self {
        let base_url =
            base_url.unwrap_or_else(|| ProviderKind::Gemini.default_base_url().to_string());
        Self {
            base_url: http::trim_base(&base_url),
            timeout,
            client: http::build_client(timeout),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    error: Option<GeminiError>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Deserialize)]
struct GeminiError {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
        let start = Instant::now();
        let api_key = http::require_key(request, "gemini")?;
        let model = match request.model.trim() {
            "" => ProviderKind::Gemini.default_model(),
            m => m.trim_start_matches("models/"),
        }
        .to_string();

        // generateContent has no separate system role in v1beta; prepend it.
        let text = match request.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(system) => format!("{system}\n\n{}", request.prompt),
            None => request.prompt.clone(),
        };
        let body = GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".into()),
                parts: vec![GeminiPart { text }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/v1beta/models/{model}:generateContent", self.base_url))
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| http::send_error(e, self.timeout))?;
        let response = http::check_status(response, &model).await?;

        let api_response: GeminiResponse = response.json().await.map_err(http::invalid_body)?;
        if let Some(err) = api_response.error {
            return Err(ProviderError::ApiError {
                status: err.code,
                message: err.message,
            }
            .into());
        }

        let content = api_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse("Gemini returned no text".into()))?;

        Ok(GenerateResponse {
            content,
            model: api_response.model_version.unwrap_or(model),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        [
            ("gemini-1.5-flash", "Gemini 1.5 Flash", 1_048_576),
            ("gemini-1.5-pro", "Gemini 1.5 Pro", 2_097_152),
            ("gemini-2.0-flash", "Gemini 2.0 Flash", 1_048_576),
        ]
        .into_iter()
        .map(|(id, name, max_context)| ModelInfo {
            id: id.into(),
            name: name.into(),
            provider: "gemini".into(),
            max_context,
        })
        .collect()
    }

    fn default_model(&self) -> &str {
        ProviderKind::Gemini.default_model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> GenerateRequest {
        GenerateRequest {
            model: "models/gemini-1.5-flash".into(),
            api_key: Some("g-key".into()),
            system_prompt: Some("Tutor".into()),
            prompt: "Why?".into(),
            max_tokens: 256,
            temperature: 0.2,
        }
    }

    #[tokio::test]
    async fn successful_generation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
            .and(query_param("key", "g-key"))
            .and(body_partial_json(serde_json::json!({
                "contents": [{"role": "user", "parts": [{"text": "Tutor\n\nWhy?"}]}],
                "generationConfig": {"maxOutputTokens": 256}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": "Because."}]}}]
            })))
            .mount(&server)
            .await;

        let provider = GeminiProvider::new(Some(server.uri()), Duration::from_secs(5));
        let response = provider.generate(&request()).await.unwrap();
        assert_eq!(response.content, "Because.");
        assert_eq!(response.model, "gemini-1.5-flash");
    }

    #[tokio::test]
    async fn error_object_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": {"code": 400, "message": "API key not valid"}
            })))
            .mount(&server)
            .await;

        let provider = GeminiProvider::new(Some(server.uri()), Duration::from_secs(5));
        let err = provider.generate(&request()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProviderError>(),
            Some(ProviderError::ApiError { status: 400, .. })
        ));
    }

    #[tokio::test]
    async fn unknown_model_maps_to_model_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = GeminiProvider::new(Some(server.uri()), Duration::from_secs(5));
        let err = provider.generate(&request()).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ProviderError>(),
            Some(&ProviderError::ModelNotFound("gemini-1.5-flash".into()))
        );
    }
}
