//! The provider trait and prompt construction.
//!
//! `LlmProvider` is implemented by the adapters in `gifttest-providers`.
//! Providers are stateless: the API key travels with each request, so one
//! adapter instance serves every configured key.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::Question;

// ---------------------------------------------------------------------------
// LLM Provider trait
// ---------------------------------------------------------------------------

/// A text-generation backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name as used in configuration (e.g. "groq").
    fn name(&self) -> &str;

    /// Send one prompt and return the generated text.
    ///
    /// Failures should be `ProviderError` values wrapped in `anyhow::Error`
    /// so callers can classify them.
    async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse>;

    /// Curated list of models known to work with this provider.
    fn available_models(&self) -> Vec<ModelInfo>;

    /// Model used when the configuration names none.
    fn default_model(&self) -> &str;

    fn requires_api_key(&self) -> bool {
        true
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    /// Credential for this call. Some local or mocked backends need none.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl std::fmt::Debug for GenerateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerateRequest")
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("system_prompt", &self.system_prompt)
            .field("prompt", &self.prompt)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub content: String,
    /// Model that actually answered.
    pub model: String,
    pub latency_ms: u64,
}

/// Information about an available model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub provider: String,
    /// Maximum context window size in tokens.
    pub max_context: u32,
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

pub const DEFAULT_SYSTEM_PROMPT: &str = "És um professor de nível universitário";

pub const DEFAULT_PROMPT_TEMPLATE: &str = "Por favor explica, com rigor, a resposta certa e \
as respostas erradas da pergunta em baixo. Responde em texto simples, com parágrafos curtos, \
e indica referências (artigos científicos ou recursos educacionais) se forem relevantes.";

pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_TEMPERATURE: f64 = 0.2;

/// The template followed by the question and its possible answers.
pub fn build_prompt(template: &str, question: &Question) -> String {
    let mut prompt = String::with_capacity(template.len() + question.stem.len() + 128);
    prompt.push_str(template.trim());
    prompt.push_str("\n\nPergunta:\n");
    prompt.push_str(&question.stem);
    prompt.push_str("\n\nRespostas possíveis:");
    for answer in &question.answers {
        prompt.push_str("\n- ");
        prompt.push_str(&answer.text);
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QuestionId;
    use crate::parser::parse;

    #[test]
    fn prompt_lists_question_and_answers() {
        let (bank, _) = parse("::Q:: Capital of Portugal? {=Lisboa ~Porto}", "t");
        let q = bank.by_id(QuestionId(1)).unwrap();

        let prompt = build_prompt("  Explain.  ", q);
        assert_eq!(
            prompt,
            "Explain.\n\nPergunta:\nCapital of Portugal?\n\nRespostas possíveis:\n- Lisboa\n- Porto"
        );
    }

    #[test]
    fn debug_masks_api_key() {
        let request = GenerateRequest {
            model: "m".into(),
            api_key: Some("secret-key".into()),
            system_prompt: None,
            prompt: "p".into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        };
        let debug = format!("{request:?}");
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("***"));
        assert!(!serde_json::to_string(&request).unwrap().contains("secret-key"));
    }
}
