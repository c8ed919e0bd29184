//! The `gifttest init` command.

use std::path::Path;

use anyhow::{Context, Result};

pub fn execute() -> Result<()> {
    write_if_missing(Path::new("gifttest.toml"), SAMPLE_CONFIG)?;

    std::fs::create_dir_all("banks").context("failed to create banks/")?;
    write_if_missing(Path::new("banks/example.gift"), EXAMPLE_BANK)?;

    println!("\nNext steps:");
    println!("  1. Add an API key to gifttest.toml (or set GIFTTEST_GROQ_KEY)");
    println!("  2. Run: gifttest validate --file banks/example.gift");
    println!("  3. Run: gifttest practice --file banks/example.gift");

    Ok(())
}

fn write_if_missing(path: &Path, content: &str) -> Result<()> {
    if path.exists() {
        println!("{} already exists, skipping.", path.display());
    } else {
        std::fs::write(path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Created {}", path.display());
    }
    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# gifttest configuration

# Where history.jsonl and explanations.json live.
# data_dir = "~/.local/share/GiftTest"
quick_test_questions = 20

[llm]
provider = "groq"
timeout_secs = 60

[llm.api_keys]
groq = "${GROQ_API_KEY}"
# gemini = "${GEMINI_API_KEY}"
# cloudflare = "ACCOUNT_ID:API_TOKEN"

[llm.models]
groq = "llama-3.3-70b-versatile"
"#;

const EXAMPLE_BANK: &str = r#"// Example GIFT question bank
$CATEGORY: Geografia

::Q1:: Qual é a capital de Portugal? {
=Lisboa
~Porto
~Coimbra
~Braga
}

::Q2:: O rio Tejo desagua no Oceano Atlântico. {T}

$CATEGORY: Ciências

::Q3:: Qual é o símbolo químico do ouro? {
=Au #Do latim aurum.
~Ag
~Fe
~Cu
}

::Q4:: A água ferve a 50 °C ao nível do mar. {F}
"#;
