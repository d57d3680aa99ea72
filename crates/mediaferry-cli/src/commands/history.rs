//! History command implementation.

use anyhow::Result;
use chrono::Local;

use mediaferry_core::asset::format_size;
use mediaferry_core::history::HistoryLedger;

use super::{with_hint, HistoryArgs};
use crate::ui;

/// Run the history command.
pub fn run(args: &HistoryArgs) -> Result<()> {
    let config = super::load_config();
    let mut ledger = HistoryLedger::open(config.history_path());

    if args.clear {
        let count = ledger.count();
        ledger.clear().map_err(with_hint)?;
        println!("Cleared {count} history entries.");
        return Ok(());
    }

    if !args.forget.is_empty() {
        let paths: Vec<String> = args
            .forget
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let removed = ledger
            .remove_many(paths.iter().map(String::as_str))
            .map_err(with_hint)?;
        println!("Forgot {removed} of {} files.", paths.len());
        return Ok(());
    }

    let entries = ledger.list_all();

    if args.json {
        let output = serde_json::json!({
            "count": entries.len(),
            "last_transfer_time": ledger.last_transfer_time(),
            "entries": entries,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No transfer history.");
        return Ok(());
    }

    println!();
    println!("  {} files transferred", entries.len());
    if let Some(last) = ledger.last_transfer_time() {
        println!(
            "  Last transfer: {}",
            last.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        );
    }
    println!();
    println!("  {:<40} {:>10}  {}", "FILE", "SIZE", "TRANSFERRED");
    for entry in &entries {
        println!(
            "  {:<40} {:>10}  {}",
            ui::truncate(&entry.display_name, 40),
            format_size(entry.size),
            entry
                .transferred_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
        );
    }
    println!();
    Ok(())
}
