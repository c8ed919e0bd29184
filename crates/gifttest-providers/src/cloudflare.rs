//! Cloudflare Workers AI provider.
//!
//! The API key has the form `ACCOUNT_ID:API_TOKEN`; the token itself may
//! contain colons.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use gifttest_core::error::ProviderError;
use gifttest_core::traits::{GenerateRequest, GenerateResponse, LlmProvider, ModelInfo};

use crate::config::ProviderKind;
use crate::http;

pub struct CloudflareProvider {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl CloudflareProvider {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Self {
        let base_url =
            base_url.unwrap_or_else(|| ProviderKind::Cloudflare.default_base_url().to_string());
        Self {
            base_url: http::trim_base(&base_url),
            timeout,
            client: http::build_client(timeout),
        }
    }
}

/// Split `ACCOUNT_ID:API_TOKEN` at the first colon.
pub fn split_credentials(key: &str) -> Result<(&str, &str), ProviderError> {
    let invalid = || {
        ProviderError::AuthenticationFailed(
            "Cloudflare credentials must be ACCOUNT_ID:API_TOKEN".into(),
        )
    };
    let (account, token) = key.split_once(':').ok_or_else(invalid)?;
    let (account, token) = (account.trim(), token.trim());
    if account.is_empty() || token.is_empty() {
        return Err(invalid());
    }
    Ok((account, token))
}

#[derive(Serialize)]
struct RunRequest<'a> {
    messages: Vec<RunMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Serialize)]
struct RunMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct RunResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Option<RunResult>,
    #[serde(default)]
    errors: Vec<RunError>,
}

#[derive(Deserialize)]
struct RunResult {
    #[serde(default)]
    response: Option<String>,
}

#[derive(Deserialize)]
struct RunError {
    #[serde(default)]
    message: String,
}

#[async_trait]
impl LlmProvider for CloudflareProvider {
    fn name(&self) -> &str {
        "cloudflare"
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
        let start = Instant::now();
        let (account, token) = split_credentials(http::require_key(request, "cloudflare")?)?;
        let model = match request.model.trim() {
            "" => ProviderKind::Cloudflare.default_model(),
            m => m,
        }
        .to_string();

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
            messages.push(RunMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(RunMessage {
            role: "user",
            content: &request.prompt,
        });

        let response = self
            .client
            .post(format!(
                "{}/client/v4/accounts/{account}/ai/run/{model}",
                self.base_url
            ))
            .bearer_auth(token)
            .json(&RunRequest {
                messages,
                max_tokens: request.max_tokens,
                temperature: request.temperature,
            })
            .send()
            .await
            .map_err(|e| http::send_error(e, self.timeout))?;
        let response = http::check_status(response, &model).await?;

        let api_response: RunResponse = response.json().await.map_err(http::invalid_body)?;
        if !api_response.success {
            let message = api_response
                .errors
                .into_iter()
                .next()
                .map(|e| e.message)
                .unwrap_or_else(|| "unknown error".into());
            return Err(ProviderError::InvalidResponse(format!("Cloudflare error: {message}")).into());
        }

        let content = api_response
            .result
            .and_then(|r| r.response)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse("Cloudflare returned no text".into()))?;

        Ok(GenerateResponse {
            content,
            model,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        [
            ("@cf/meta/llama-3-8b-instruct", "Llama 3 8B Instruct", 8_192),
            ("@cf/meta/llama-3.1-8b-instruct", "Llama 3.1 8B Instruct", 131_072),
            ("@cf/mistral/mistral-7b-instruct-v0.1", "Mistral 7B Instruct", 32_768),
        ]
        .into_iter()
        .map(|(id, name, max_context)| ModelInfo {
            id: id.into(),
            name: name.into(),
            provider: "cloudflare".into(),
            max_context,
        })
        .collect()
    }

    fn default_model(&self) -> &str {
        ProviderKind::Cloudflare.default_model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(key: &str) -> GenerateRequest {
        GenerateRequest {
            model: "@cf/meta/llama-3-8b-instruct".into(),
            api_key: Some(key.into()),
            system_prompt: None,
            prompt: "Explain".into(),
            max_tokens: 128,
            temperature: 0.2,
        }
    }

    #[test]
    fn credentials_split_on_first_colon() {
        assert_eq!(split_credentials("acct:tok:en").unwrap(), ("acct", "tok:en"));
        assert!(split_credentials("no-colon").is_err());
        assert!(split_credentials(" :token").is_err());
    }

    #[tokio::test]
    async fn successful_generation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/client/v4/accounts/acct/ai/run/@cf/meta/llama-3-8b-instruct"))
            .and(header("Authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "result": {"response": "Explained."},
                "errors": []
            })))
            .mount(&server)
            .await;

        let provider = CloudflareProvider::new(Some(server.uri()), Duration::from_secs(5));
        let response = provider.generate(&request("acct:tok")).await.unwrap();
        assert_eq!(response.content, "Explained.");
    }

    #[tokio::test]
    async fn unsuccessful_payload_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "errors": [{"message": "model busy"}]
            })))
            .mount(&server)
            .await;

        let provider = CloudflareProvider::new(Some(server.uri()), Duration::from_secs(5));
        let err = provider.generate(&request("acct:tok")).await.unwrap_err();
        assert!(err.to_string().contains("model busy"));
    }

    #[tokio::test]
    async fn malformed_key_is_rejected_locally() {
        let provider = CloudflareProvider::new(Some("http://127.0.0.1:9".into()), Duration::from_secs(1));
        let err = provider.generate(&request("just-a-token")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProviderError>(),
            Some(ProviderError::AuthenticationFailed(_))
        ));
    }
}
