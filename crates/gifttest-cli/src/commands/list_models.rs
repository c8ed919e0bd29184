//! The `gifttest list-models` command.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use gifttest_providers::config::load_config_from;
use gifttest_providers::{create_provider, ProviderKind};

pub fn execute(provider_filter: Option<String>, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let kinds = match provider_filter {
        Some(name) => vec![name.parse::<ProviderKind>()?],
        None => ProviderKind::ALL.to_vec(),
    };
    let timeout = Duration::from_secs(config.llm.timeout_secs);

    for kind in kinds {
        let provider = create_provider(kind, config.base_url(kind), timeout);
        let selected = config.model(kind);
        let key_note = match (provider.requires_api_key(), config.api_key(kind)) {
            (false, _) => "no key needed",
            (true, Some(_)) => "key configured",
            (true, None) => "no key",
        };

        println!("Provider: {kind} ({key_note})");
        for model in provider.available_models() {
            let marker = if model.id == selected { "*" } else { " " };
            println!(
                " {marker} {} — {} ({}K context)",
                model.id,
                model.name,
                model.max_context / 1000,
            );
        }
        if !provider.available_models().iter().any(|m| m.id == selected) {
            println!(" * {selected} (configured)");
        }
        println!();
    }

    Ok(())
}
