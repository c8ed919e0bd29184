//! The `gifttest history` command.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use gifttest_core::history::HistoryStore;
use gifttest_core::scoring::TestOutcome;
use gifttest_providers::config::load_config_from;

pub fn execute(
    source: Option<String>,
    limit: usize,
    stats: bool,
    reset: bool,
    yes: bool,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let store = super::open_history(&config)?;

    if reset {
        let stdin = io::stdin();
        return reset_history(&store, yes, &mut stdin.lock(), &mut io::stdout());
    }
    if stats {
        print_stats(&store, source.as_deref());
        return Ok(());
    }

    let records = store.recent(limit, source.as_deref());
    if records.is_empty() {
        println!("No tests recorded yet.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Date", "Bank", "Categories", "Outcome", "Correct", "Score"]);

    for r in &records {
        let outcome = match r.outcome {
            TestOutcome::Completed => "completed",
            TestOutcome::EndedEarly => "ended early",
        };
        table.add_row(vec![
            Cell::new(r.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")),
            Cell::new(&r.source),
            Cell::new(r.categories.join(", ")),
            Cell::new(outcome),
            Cell::new(format!("{}/{}", r.correct, r.total_asked)),
            Cell::new(format!("{:.1}%", r.percentage)),
        ]);
    }

    println!("{table}");
    Ok(())
}

fn print_stats(store: &HistoryStore, source: Option<&str>) {
    let stats = store.stats(source);
    if stats.total_tests == 0 {
        println!("No tests recorded yet.");
        return;
    }
    println!("Tests taken:       {}", stats.total_tests);
    println!("Questions asked:   {}", stats.total_questions);
    println!("Correct answers:   {}", stats.total_correct);
    println!("Average score:     {:.1}%", stats.average_score);
}

fn reset_history(
    store: &HistoryStore,
    yes: bool,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> Result<()> {
    if store.is_empty() {
        writeln!(output, "History is already empty.")?;
        return Ok(());
    }

    if !yes {
        let answer = super::prompt_line(
            input,
            output,
            &format!("Delete all {} recorded tests? Type 'yes' to confirm: ", store.len()),
        )?;
        if answer.as_deref() != Some("yes") {
            writeln!(output, "Reset cancelled.")?;
            return Ok(());
        }
    }

    store.reset_all(store.request_reset())?;
    writeln!(output, "History cleared.")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gifttest_core::history::HistoryRecord;

    fn record() -> HistoryRecord {
        HistoryRecord {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            source: "bank.gift".into(),
            categories: vec!["Geo".into()],
            outcome: TestOutcome::Completed,
            total_asked: 2,
            correct: 1,
            wrong: 1,
            percentage: 50.0,
            wrong_details: vec![],
        }
    }

    #[test]
    fn reset_requires_the_word_yes() {
        let store = HistoryStore::in_memory();
        store.append(record()).unwrap();

        let mut out = Vec::new();
        reset_history(&store, false, &mut "y\n".as_bytes(), &mut out).unwrap();
        assert_eq!(store.len(), 1);
        assert!(String::from_utf8_lossy(&out).contains("cancelled"));

        reset_history(&store, false, &mut "yes\n".as_bytes(), &mut Vec::new()).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn reset_with_yes_flag_skips_the_prompt() {
        let store = HistoryStore::in_memory();
        store.append(record()).unwrap();
        reset_history(&store, true, &mut "".as_bytes(), &mut Vec::new()).unwrap();
        assert!(store.is_empty());
    }
}
