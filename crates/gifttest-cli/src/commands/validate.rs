//! The `gifttest validate` command.

use std::path::PathBuf;

use anyhow::Result;

use gifttest_core::parser;

pub fn execute(file: PathBuf, json: bool) -> Result<()> {
    let (bank, warnings) = super::load_bank(&file)?;
    let report = parser::validate(&bank, &warnings);

    if json {
        let doc = serde_json::json!({
            "report": report,
            "warnings": warnings,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("Bank: {} ({} questions)", report.source, report.total_questions);
    for (category, count) in &report.per_category {
        println!("  {category}: {count}");
    }

    for w in &warnings {
        let level = if w.rejects_entry() { "SKIPPED" } else { "WARNING" };
        println!("  {level}: {w}");
    }

    if report.is_clean() {
        println!("All questions valid.");
    } else {
        println!(
            "\n{} entr{} skipped, {} advisory warning(s).",
            report.rejected,
            if report.rejected == 1 { "y" } else { "ies" },
            report.advisories
        );
    }

    Ok(())
}
