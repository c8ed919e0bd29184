//! gifttest-providers — LLM backends for question explanations.
//!
//! Implements the `LlmProvider` trait for Groq, Hugging Face, Gemini,
//! Mistral, Perplexity, OpenRouter, Cloudflare Workers AI and OpenAI, plus
//! an offline mock, and loads the application configuration.

pub mod cloudflare;
pub mod config;
pub mod gemini;
mod http;
pub mod huggingface;
pub mod mock;
pub mod openai_compat;

pub use config::{
    build_registry, create_provider, load_config, load_config_from, GiftTestConfig, LlmConfig,
    ProviderKind,
};
pub use gifttest_core::error::ProviderError;
