//! The `gifttest explain` command.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};

use gifttest_core::bank::CategoryFilter;
use gifttest_core::explain::Explanation;
use gifttest_providers::config::load_config_from;

pub async fn execute(
    file: PathBuf,
    question: Option<String>,
    all: bool,
    provider: Option<String>,
    model: Option<String>,
    parallelism: usize,
    config_path: Option<PathBuf>,
) -> Result<()> {
    anyhow::ensure!(parallelism >= 1, "parallelism must be at least 1");

    let config = load_config_from(config_path.as_deref())?;
    let (bank, _) = super::load_bank(&file)?;
    let kind = super::resolve_provider(&config, provider.as_deref())?;
    let explain_config = config.explain_config(kind, model.as_deref());
    let service = super::explanation_service(&config);

    if all {
        let questions = bank.questions_in(CategoryFilter::All);
        anyhow::ensure!(!questions.is_empty(), "{} has no usable questions", bank.source());
        eprintln!(
            "Explaining {} questions with {kind}/{} ({} at a time)",
            questions.len(),
            explain_config.model,
            parallelism
        );

        let start = Instant::now();
        let results = service.prefetch(&questions, &explain_config, parallelism).await;
        let cached = results
            .iter()
            .filter(|(_, r)| r.as_ref().is_ok_and(|e| e.from_cache))
            .count();
        let failed: Vec<_> = results.iter().filter(|(_, r)| r.is_err()).collect();
        for (id, result) in &failed {
            if let Err(e) = result {
                eprintln!("  ERROR: question {id}: {e}");
            }
        }
        eprintln!(
            "\nComplete: {} generated, {cached} already cached, {} failed ({:.1}s)",
            results.len() - cached - failed.len(),
            failed.len(),
            start.elapsed().as_secs_f64()
        );
        anyhow::ensure!(failed.is_empty(), "{} explanation(s) failed", failed.len());
        return Ok(());
    }

    let query = question.context("either --question or --all is required")?;
    let q = bank
        .find(&query)
        .with_context(|| format!("no question matching '{query}' in {}", bank.source()))?;

    let explanation = service
        .explain(q, &explain_config)
        .await
        .with_context(|| format!("failed to explain {}", q.label()))?;

    println!("{}\n", q.stem);
    println!("{}", explanation.text.trim());
    println!("\n{}", footer(&explanation, &explain_config.provider, &explain_config.model));
    if let Some(e) = &explanation.persist_error {
        eprintln!("Warning: explanation not saved to cache: {e}");
    }
    Ok(())
}

fn footer(explanation: &Explanation, provider: &str, model: &str) -> String {
    let origin = if explanation.from_cache {
        "cached"
    } else {
        "generated"
    };
    format!(
        "-- {provider}/{model}, {origin}, {:.1}s",
        explanation.elapsed_ms as f64 / 1000.0
    )
}
