pub mod categories;
pub mod explain;
pub mod history;
pub mod init;
pub mod list_models;
pub mod practice;
pub mod questions;
pub mod validate;

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use gifttest_core::bank::QuestionBank;
use gifttest_core::cache::ExplanationCache;
use gifttest_core::explain::ExplanationService;
use gifttest_core::history::HistoryStore;
use gifttest_core::parser::{self, ParseWarning};
use gifttest_providers::{build_registry, GiftTestConfig, ProviderKind};

/// Parse a bank, logging every warning.
fn load_bank(file: &Path) -> Result<(QuestionBank, Vec<ParseWarning>)> {
    let (bank, warnings) = parser::parse_file(file)?;
    for w in &warnings {
        tracing::debug!("{w}");
    }
    Ok((bank, warnings))
}

fn open_history(config: &GiftTestConfig) -> Result<HistoryStore> {
    let path = config.history_path();
    HistoryStore::open(&path)
        .with_context(|| format!("failed to open history: {}", path.display()))
}

fn explanation_service(config: &GiftTestConfig) -> Arc<ExplanationService> {
    Arc::new(ExplanationService::new(
        build_registry(config),
        ExplanationCache::load(config.cache_path()),
    ))
}

/// The provider named on the command line, or the configured default.
fn resolve_provider(config: &GiftTestConfig, name: Option<&str>) -> Result<ProviderKind> {
    match name {
        Some(name) => name.parse(),
        None => Ok(config.llm.provider),
    }
}

/// Ask a question and read one trimmed line. `None` at end of input.
fn prompt_line(input: &mut impl BufRead, output: &mut impl Write, prompt: &str) -> Result<Option<String>> {
    write!(output, "{prompt}")?;
    output.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn confirm(input: &mut impl BufRead, output: &mut impl Write, question: &str) -> Result<bool> {
    let answer = prompt_line(input, output, &format!("{question} [y/N] "))?;
    Ok(matches!(
        answer.as_deref().map(str::to_ascii_lowercase).as_deref(),
        Some("y" | "yes" | "s" | "sim")
    ))
}
