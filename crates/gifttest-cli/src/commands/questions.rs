//! The `gifttest questions` command.

use std::path::PathBuf;

use anyhow::{bail, Result};
use comfy_table::{presets::UTF8_FULL, Cell, CellAlignment, ContentArrangement, Table};

use gifttest_core::bank::CategoryFilter;
use gifttest_core::model::Question;

const PREVIEW_CHARS: usize = 100;

pub fn execute(file: PathBuf, category: Option<String>, search: Option<String>) -> Result<()> {
    let (bank, _) = super::load_bank(&file)?;

    let filter = match category.as_deref() {
        Some(name) if bank.category_len(name) == 0 => {
            bail!(
                "unknown category: {name} (available: {})",
                bank.categories().join(", ")
            );
        }
        Some(name) => CategoryFilter::Named(name),
        None => CategoryFilter::All,
    };

    let found = bank.search(filter, search.as_deref().unwrap_or_default());
    if found.is_empty() {
        println!("No questions match.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["ID", "Title", "Category", "Question", "Answers"]);

    for q in &found {
        table.add_row(vec![
            Cell::new(q.id).set_alignment(CellAlignment::Right),
            Cell::new(q.name.as_deref().unwrap_or("")),
            Cell::new(&q.category),
            Cell::new(preview(&q.stem)),
            Cell::new(preview(&answers(q))),
        ]);
    }

    println!("{table}");
    println!("{} of {} question(s)", found.len(), bank.len());
    Ok(())
}

fn answers(q: &Question) -> String {
    q.answers
        .iter()
        .map(|a| a.text.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Single line, cut at `PREVIEW_CHARS` characters.
fn preview(text: &str) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let mut cut: String = flat.chars().take(PREVIEW_CHARS).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_flattens_and_truncates() {
        assert_eq!(preview("one\ntwo"), "one two");
        let long = "é".repeat(150);
        let cut = preview(&long);
        assert_eq!(cut.chars().count(), PREVIEW_CHARS + 3);
        assert!(cut.ends_with("..."));
    }
}
