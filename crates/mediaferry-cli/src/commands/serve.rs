//! Serve command implementation.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use futures::StreamExt;

use mediaferry_core::asset::{format_size, EnumerateOptions, FsCatalog, TransferBatch};
use mediaferry_core::progress::ProgressSnapshot;
use mediaferry_core::transfer::{Eligibility, StartedServer, TransferSession};
use mediaferry_core::transport::TransportKind;

use super::{with_hint, ServeArgs};
use crate::ui;

const REDRAW_INTERVAL: Duration = Duration::from_millis(200);

/// How the serving loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    Interrupted,
    AllServed,
}

/// Run the serve command.
pub async fn run(args: ServeArgs) -> Result<()> {
    let mut config = super::load_config();
    let kind = TransportKind::from(args.transport);
    if let Some(port) = args.port {
        match kind {
            TransportKind::Http => config.http.port = port,
            TransportKind::Line => config.line.port = port,
        }
    }
    let incremental = args.incremental || config.history.incremental;

    let catalog = FsCatalog::new();
    let options = EnumerateOptions {
        include_all: args.all_files,
        include_hidden: args.hidden,
        max_depth: None,
    };
    let selected = catalog.enumerate(&args.paths, &options).map_err(with_hint)?;

    let mut session = TransferSession::open(config, Arc::new(catalog));
    let batch = match session.compute_eligible_assets(&selected, incremental) {
        Eligibility::Ready(batch) => batch,
        Eligibility::Empty(reason) => {
            if args.json {
                println!("{}", serde_json::json!({ "served": 0, "reason": reason.to_string() }));
            } else {
                println!("  {reason}");
            }
            return Ok(());
        }
    };

    let started = session
        .start(kind, batch.clone())
        .await
        .map_err(with_hint)?;

    if !args.quiet && !args.json {
        display_started(&session, &started, &batch, selected.len());
    }

    let start_time = Instant::now();
    let reason = wait_for_end(&session, args.until_done, args.quiet || args.json).await;
    let snapshot = session.progress().snapshot();
    let complete = served_everything(&snapshot);

    let deletion = if args.delete_after && complete {
        let report = session.complete_and_delete(&batch).await.map_err(with_hint)?;
        Some(report)
    } else {
        session.stop().await;
        None
    };

    if args.json {
        let output = serde_json::json!({
            "transport": kind.to_string(),
            "address": started.local_addr.to_string(),
            "files": batch.len(),
            "total_size": batch.total_bytes(),
            "completed_files": snapshot.completed_files,
            "failed_files": snapshot.failed_files,
            "transferred_bytes": snapshot.transferred_bytes,
            "interrupted": reason == EndReason::Interrupted,
            "elapsed_secs": start_time.elapsed().as_secs(),
            "deletion": deletion,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if !args.quiet {
        display_summary(&snapshot, reason, start_time.elapsed());
        if args.delete_after && !complete {
            println!("  Transfer incomplete, nothing was deleted.");
        }
    }

    if let Some(report) = deletion {
        if !args.json && !args.quiet {
            println!(
                "  Deleted {} of {} files.",
                report.deleted,
                report.deleted + report.failed
            );
        }
        report.ensure_complete().map_err(with_hint)?;
    }

    Ok(())
}

fn display_started(
    session: &TransferSession,
    started: &StartedServer,
    batch: &TransferBatch,
    selected: usize,
) {
    println!();
    println!("MediaFerry v{}", mediaferry_core::VERSION);
    println!("{}", "-".repeat(37));
    println!();
    println!(
        "  Serving {} files ({}) over {}",
        started.file_count,
        format_size(started.total_bytes),
        started.kind
    );
    if selected > batch.len() {
        println!(
            "  Skipped {} files already transferred",
            selected - batch.len()
        );
    }
    if started.resumed {
        let snapshot = session.progress().snapshot();
        println!(
            "  Resuming an interrupted session ({:.0}% already sent)",
            snapshot.percentage()
        );
    }
    println!();

    for (index, asset) in batch.iter().enumerate().take(10) {
        println!(
            "  #{index:<3} {:<40} {:>10}",
            ui::truncate(&asset.display_name, 40),
            format_size(asset.byte_size)
        );
    }
    if batch.len() > 10 {
        println!("  ... and {} more", batch.len() - 10);
    }
    println!();

    let port = started.local_addr.port();
    match started.kind {
        TransportKind::Http => {
            println!("  Open http://{}:{port}/ in a browser", display_host(started));
        }
        TransportKind::Line => {
            println!("  Line protocol listening on port {port}");
            println!("  On the desktop: adb forward tcp:{port} tcp:{port} && mediaferry pull --port {port}");
        }
    }
    println!("  Press Ctrl+C to stop.");
    println!();
}

fn display_host(started: &StartedServer) -> String {
    let ip = started.local_addr.ip();
    if ip.is_unspecified() {
        "<this-device-ip>".to_string()
    } else {
        ip.to_string()
    }
}

/// Render progress until Ctrl+C or, with `until_done`, until every file
/// has been served.
async fn wait_for_end(session: &TransferSession, until_done: bool, quiet: bool) -> EndReason {
    let mut updates = session.progress().stream();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut last_draw: Option<Instant> = None;

    let reason = loop {
        tokio::select! {
            _ = &mut ctrl_c => break EndReason::Interrupted,
            update = updates.next() => {
                let Some(snapshot) = update else {
                    break EndReason::Interrupted;
                };
                let served = served_everything(&snapshot);
                if !quiet && (served || last_draw.is_none_or(|t| t.elapsed() >= REDRAW_INTERVAL)) {
                    print!("\r{}   ", ui::progress_line(&snapshot));
                    let _ = io::stdout().flush();
                    last_draw = Some(Instant::now());
                }
                if until_done && served {
                    break EndReason::AllServed;
                }
            }
        }
    };

    if !quiet && last_draw.is_some() {
        println!();
    }
    reason
}

fn served_everything(snapshot: &ProgressSnapshot) -> bool {
    snapshot.total_files > 0 && snapshot.completed_files >= snapshot.total_files
}

fn display_summary(snapshot: &ProgressSnapshot, reason: EndReason, elapsed: Duration) {
    println!();
    match reason {
        EndReason::AllServed => println!("  All files served."),
        EndReason::Interrupted => println!("  Stopped."),
    }
    println!(
        "  {} of {} files sent, {} failed, {} in {}s",
        snapshot.completed_files,
        snapshot.total_files,
        snapshot.failed_files,
        format_size(snapshot.transferred_bytes),
        elapsed.as_secs()
    );
}
