//! Pull command implementation.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use futures::StreamExt;

use mediaferry_core::asset::format_size;
use mediaferry_core::client::LineClient;
use mediaferry_core::progress::ProgressHub;

use super::{with_hint, PullArgs};
use crate::ui;

/// Run the pull command.
pub async fn run(args: PullArgs) -> Result<()> {
    let config = super::load_config();
    let port = args.port.unwrap_or(config.line.port);
    let output = args.output.clone().unwrap_or_else(default_output_dir);
    let client = LineClient::new(format!("{}:{port}", args.host));

    let count = client
        .count()
        .await
        .map_err(with_hint)
        .with_context(|| format!("No line-protocol server reachable at {}", client.addr()))?;

    if !args.quiet && !args.json {
        println!();
        println!("MediaFerry v{}", mediaferry_core::VERSION);
        println!("{}", "-".repeat(37));
        println!();
        println!("  {count} files offered by {}", client.addr());
        println!("  Saving to {}", output.display());
        println!();
    }

    let progress = ProgressHub::new(config.progress.throughput_window);
    let renderer = (!args.quiet && !args.json).then(|| {
        let mut updates = progress.stream();
        tokio::spawn(async move {
            while let Some(snapshot) = updates.next().await {
                print!("\r{}   ", ui::progress_line(&snapshot));
                let _ = io::stdout().flush();
            }
        })
    });

    let start_time = Instant::now();
    let result = client.download_all(&output, &progress).await;

    if let Some(renderer) = renderer {
        renderer.abort();
        let _ = renderer.await;
        println!();
    }
    let summary = result.map_err(with_hint)?;

    if args.json {
        let output = serde_json::json!({
            "output": output.display().to_string(),
            "succeeded": summary.succeeded,
            "failed": summary.failed,
            "bytes_received": summary.bytes_received,
            "elapsed_secs": start_time.elapsed().as_secs(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if !args.quiet {
        println!();
        println!(
            "  Downloaded {} files ({}) in {}s",
            summary.succeeded,
            format_size(summary.bytes_received),
            start_time.elapsed().as_secs()
        );
        if summary.failed > 0 {
            println!(
                "  {} files failed. Run `mediaferry pull` again to resume them.",
                summary.failed
            );
        }
    }

    if summary.failed > 0 {
        anyhow::bail!("{} of {count} files failed", summary.failed);
    }
    Ok(())
}

/// `~/Downloads/MediaFerry`, falling back to the working directory.
fn default_output_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("MediaFerry")
}
