//! The `gifttest categories` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

pub fn execute(file: PathBuf) -> Result<()> {
    let (bank, _) = super::load_bank(&file)?;
    if bank.is_empty() {
        println!("{} has no usable questions.", bank.source());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Category", "Questions"]);

    for category in bank.categories() {
        table.add_row(vec![
            Cell::new(category),
            Cell::new(bank.category_len(category)),
        ]);
    }
    table.add_row(vec![Cell::new("Total"), Cell::new(bank.len())]);

    println!("{table}");
    Ok(())
}
