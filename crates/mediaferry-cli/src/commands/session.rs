//! Session command implementation.

use anyhow::Result;
use chrono::Local;

use mediaferry_core::asset::format_size;
use mediaferry_core::session::{SessionState, SessionStore};

use super::{with_hint, SessionArgs};
use crate::ui;

/// Run the session command.
pub fn run(args: &SessionArgs) -> Result<()> {
    let config = super::load_config();
    let mut store = SessionStore::open(config.session_path(), config.history.max_sessions);

    if args.clear {
        store.clear().map_err(with_hint)?;
        store.clear_history().map_err(with_hint)?;
        println!("Session state cleared.");
        return Ok(());
    }

    if args.json {
        let output = serde_json::json!({
            "current": store.load(),
            "has_incomplete": store.has_incomplete(),
            "progress": store.progress_fraction(),
            "history": store.history(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!();
    match store.load() {
        Some(state) => display_state(state),
        None => println!("  No session recorded."),
    }

    if !store.history().is_empty() {
        println!();
        println!("  Past sessions:");
        for state in store.history() {
            println!(
                "    {}  {} files  {}  {}",
                state.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                state.files.len(),
                format_size(state.total_bytes()),
                if state.completed { "completed" } else { "abandoned" }
            );
        }
    }
    println!();
    Ok(())
}

fn display_state(state: &SessionState) {
    let status = if state.completed {
        "completed"
    } else {
        "incomplete"
    };
    println!(
        "  Session {} ({status}), started {}",
        state.session_id,
        state.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
    );
    println!(
        "  {} {:.1}%  {} / {}",
        ui::progress_bar(state.progress_fraction(), 24),
        state.progress_fraction() * 100.0,
        format_size(state.transferred_bytes()),
        format_size(state.total_bytes())
    );

    let pending = state.incomplete_files();
    if !pending.is_empty() {
        println!();
        println!("  Remaining files:");
        for (index, file) in pending {
            println!(
                "    #{index:<3} {:<40} {:>10} left",
                ui::truncate(&file.display_name, 40),
                format_size(file.remaining_bytes())
            );
        }
    }
}
