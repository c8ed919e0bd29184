//! Application configuration and the provider factory.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use gifttest_core::cache::CACHE_FILE;
use gifttest_core::context::DEFAULT_QUICK_TEST_QUESTIONS;
use gifttest_core::explain::ExplainConfig;
use gifttest_core::history::HISTORY_FILE;
use gifttest_core::traits::{LlmProvider, DEFAULT_PROMPT_TEMPLATE, DEFAULT_SYSTEM_PROMPT};

use crate::cloudflare::CloudflareProvider;
use crate::gemini::GeminiProvider;
use crate::huggingface::HuggingFaceProvider;
use crate::mock::MockProvider;
use crate::openai_compat::OpenAiCompatProvider;

pub const CONFIG_FILE: &str = "gifttest.toml";

/// Default bound on one provider call, in seconds.
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 60;

/// Every supported explanation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Groq,
    HuggingFace,
    Gemini,
    Mistral,
    Perplexity,
    OpenRouter,
    Cloudflare,
    OpenAi,
    /// Offline canned responses, for tests and demos.
    Mock,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 9] = [
        ProviderKind::Groq,
        ProviderKind::HuggingFace,
        ProviderKind::Gemini,
        ProviderKind::Mistral,
        ProviderKind::Perplexity,
        ProviderKind::OpenRouter,
        ProviderKind::Cloudflare,
        ProviderKind::OpenAi,
        ProviderKind::Mock,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Groq => "groq",
            ProviderKind::HuggingFace => "huggingface",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Mistral => "mistral",
            ProviderKind::Perplexity => "perplexity",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Cloudflare => "cloudflare",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Mock => "mock",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Groq => "llama-3.3-70b-versatile",
            ProviderKind::HuggingFace => "meta-llama/Llama-3.1-8B-Instruct",
            ProviderKind::Gemini => "gemini-1.5-flash",
            ProviderKind::Mistral => "mistral-small-latest",
            ProviderKind::Perplexity => "sonar-pro",
            ProviderKind::OpenRouter => "meta-llama/Meta-Llama-3.1-8B-Instruct",
            ProviderKind::Cloudflare => "@cf/meta/llama-3-8b-instruct",
            ProviderKind::OpenAi => "gpt-4.1-mini",
            ProviderKind::Mock => "mock-model",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::Groq => "https://api.groq.com/openai/v1",
            ProviderKind::HuggingFace => "https://router.huggingface.co",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com",
            ProviderKind::Mistral => "https://api.mistral.ai/v1",
            ProviderKind::Perplexity => "https://api.perplexity.ai",
            ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderKind::Cloudflare => "https://api.cloudflare.com",
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Mock => "",
        }
    }

    /// Environment variable that overrides the configured key, e.g. `GIFTTEST_GROQ_KEY`.
    pub fn env_key_var(self) -> String {
        format!("GIFTTEST_{}_KEY", self.as_str().to_ascii_uppercase())
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        ProviderKind::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| {
                let known: Vec<_> = ProviderKind::ALL.iter().map(|k| k.as_str()).collect();
                anyhow::anyhow!("unknown provider '{s}' (expected one of: {})", known.join(", "))
            })
    }
}

/// Explanation settings.
///
/// Note: Custom Debug impl masks API keys to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider used when none is given on the command line.
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,
    /// API keys keyed by provider name. Values may reference `${ENV_VAR}`.
    #[serde(default)]
    pub api_keys: HashMap<String, String>,
    /// Model overrides keyed by provider name.
    #[serde(default)]
    pub models: HashMap<String, String>,
    /// Endpoint overrides keyed by provider name.
    #[serde(default)]
    pub base_urls: HashMap<String, String>,
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.api_keys.keys().collect();
        keys.sort();
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("api_keys", &keys.iter().map(|k| (k, "***")).collect::<Vec<_>>())
            .field("models", &self.models)
            .field("base_urls", &self.base_urls)
            .field("timeout_secs", &self.timeout_secs)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("max_retry_delay_ms", &self.max_retry_delay_ms)
            .finish_non_exhaustive()
    }
}

fn default_provider() -> ProviderKind {
    ProviderKind::Groq
}
fn default_prompt_template() -> String {
    DEFAULT_PROMPT_TEMPLATE.to_string()
}
fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}
fn default_timeout() -> u64 {
    DEFAULT_LLM_TIMEOUT_SECS
}
fn default_retry_delay() -> u64 {
    1000
}
fn default_max_retry_delay() -> u64 {
    10_000
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_keys: HashMap::new(),
            models: HashMap::new(),
            base_urls: HashMap::new(),
            prompt_template: default_prompt_template(),
            system_prompt: default_system_prompt(),
            timeout_secs: default_timeout(),
            retry_delay_ms: default_retry_delay(),
            max_retry_delay_ms: default_max_retry_delay(),
        }
    }
}

/// Top-level gifttest configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiftTestConfig {
    /// Directory holding the history log and the explanation cache.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_quick_test")]
    pub quick_test_questions: usize,
    #[serde(default)]
    pub llm: LlmConfig,
}

fn default_data_dir() -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(".local").join("share").join("GiftTest"))
        .unwrap_or_else(|_| PathBuf::from(".gifttest"))
}
fn default_quick_test() -> usize {
    DEFAULT_QUICK_TEST_QUESTIONS
}

impl Default for GiftTestConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            quick_test_questions: default_quick_test(),
            llm: LlmConfig::default(),
        }
    }
}

impl GiftTestConfig {
    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(HISTORY_FILE)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(CACHE_FILE)
    }

    /// Configured key for `kind`, if any.
    pub fn api_key(&self, kind: ProviderKind) -> Option<&str> {
        self.llm
            .api_keys
            .get(kind.as_str())
            .map(String::as_str)
            .filter(|k| !k.is_empty())
    }

    /// Configured model for `kind`, falling back to its default.
    pub fn model(&self, kind: ProviderKind) -> String {
        self.llm
            .models
            .get(kind.as_str())
            .filter(|m| !m.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| kind.default_model().to_string())
    }

    pub fn base_url(&self, kind: ProviderKind) -> Option<String> {
        self.llm
            .base_urls
            .get(kind.as_str())
            .filter(|u| !u.trim().is_empty())
            .cloned()
    }

    /// Settings for one explanation call through `kind`.
    pub fn explain_config(&self, kind: ProviderKind, model: Option<&str>) -> ExplainConfig {
        let model = model
            .map(str::to_string)
            .unwrap_or_else(|| self.model(kind));
        let mut config = ExplainConfig::new(kind.as_str(), model);
        config.api_key = self.api_key(kind).map(str::to_string);
        config.system_prompt = self.llm.system_prompt.clone();
        config.prompt_template = self.llm.prompt_template.clone();
        config.timeout = Duration::from_secs(self.llm.timeout_secs);
        config.retry_delay = Duration::from_millis(self.llm.retry_delay_ms);
        config.max_retry_delay = Duration::from_millis(self.llm.max_retry_delay_ms);
        config
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        result.push_str(&rest[..start]);
        let var_name = &rest[start + 2..start + len];
        result.push_str(&std::env::var(var_name).unwrap_or_default());
        rest = &rest[start + len + 1..];
    }
    result.push_str(rest);
    result
}

/// Strip control characters, whitespace and quotes pasted along with a key.
fn sanitize_api_key(key: &str) -> String {
    let cleaned: String = key.chars().filter(|c| !c.is_control()).collect();
    cleaned
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `gifttest.toml` in the current directory
/// 2. `~/.config/gifttest/config.toml`
///
/// Keys can be overridden per provider with `GIFTTEST_<PROVIDER>_KEY`, and
/// the data directory with `GIFTTEST_DATA_DIR`.
pub fn load_config() -> Result<GiftTestConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<GiftTestConfig> {
    let config_path = match path {
        Some(p) if p.exists() => Some(p.to_path_buf()),
        Some(p) => anyhow::bail!("config file not found: {}", p.display()),
        None => {
            let local = PathBuf::from(CONFIG_FILE);
            if local.exists() {
                Some(local)
            } else {
                config_dir()
                    .map(|dir| dir.join("config.toml"))
                    .filter(|p| p.exists())
            }
        }
    };

    let mut config = match &config_path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<GiftTestConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => GiftTestConfig::default(),
    };
    if let Some(path) = &config_path {
        tracing::debug!(path = %path.display(), "loaded configuration");
    }

    apply_env_overrides(&mut config);
    Ok(config)
}

fn apply_env_overrides(config: &mut GiftTestConfig) {
    for kind in ProviderKind::ALL {
        if let Ok(key) = std::env::var(kind.env_key_var()) {
            config.llm.api_keys.insert(kind.as_str().to_string(), key);
        }
    }
    if let Ok(dir) = std::env::var("GIFTTEST_DATA_DIR") {
        if !dir.trim().is_empty() {
            config.data_dir = PathBuf::from(dir);
        }
    }

    for key in config.llm.api_keys.values_mut() {
        *key = sanitize_api_key(&resolve_env_vars(key));
    }
    for url in config.llm.base_urls.values_mut() {
        *url = resolve_env_vars(url);
    }
}

fn config_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("gifttest"))
}

/// Create a provider instance for `kind`.
pub fn create_provider(
    kind: ProviderKind,
    base_url: Option<String>,
    timeout: Duration,
) -> Arc<dyn LlmProvider> {
    match kind {
        ProviderKind::Groq
        | ProviderKind::Mistral
        | ProviderKind::Perplexity
        | ProviderKind::OpenRouter
        | ProviderKind::OpenAi => Arc::new(OpenAiCompatProvider::new(kind, base_url, timeout)),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(base_url, timeout)),
        ProviderKind::Cloudflare => Arc::new(CloudflareProvider::new(base_url, timeout)),
        ProviderKind::HuggingFace => Arc::new(HuggingFaceProvider::new(base_url, timeout)),
        ProviderKind::Mock => Arc::new(MockProvider::explainer()),
    }
}

/// One provider per kind, keyed by provider name.
pub fn build_registry(config: &GiftTestConfig) -> HashMap<String, Arc<dyn LlmProvider>> {
    let timeout = Duration::from_secs(config.llm.timeout_secs);
    ProviderKind::ALL
        .into_iter()
        .map(|kind| {
            (
                kind.as_str().to_string(),
                create_provider(kind, config.base_url(kind), timeout),
            )
        })
        .collect()
}
