//! UI utilities for MediaFerry CLI.

use mediaferry_core::asset::format_size;
use mediaferry_core::progress::ProgressSnapshot;

const BAR_WIDTH: usize = 24;

/// Format a throughput as `x.xx MB/s`.
pub fn format_speed(bytes_per_sec: u64) -> String {
    format!("{:.2} MB/s", bytes_per_sec as f64 / (1024.0 * 1024.0))
}

/// Format an ETA in seconds for humans.
pub fn format_eta(eta_seconds: Option<u64>) -> String {
    match eta_seconds {
        None => "--".to_string(),
        Some(secs) if secs < 60 => format!("about {secs} s"),
        Some(secs) if secs < 3600 => format!("about {} min {} s", secs / 60, secs % 60),
        Some(secs) => format!("about {} h", secs.div_ceil(3600)),
    }
}

/// Render `[#####.....]` for a fraction in `0.0..=1.0`.
pub fn progress_bar(fraction: f64, width: usize) -> String {
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let filled = ((fraction * width as f64).round() as usize).min(width);
    format!("[{}{}]", "#".repeat(filled), ".".repeat(width - filled))
}

/// One-line progress summary, redrawn in place with `\r`.
pub fn progress_line(snapshot: &ProgressSnapshot) -> String {
    format!(
        "  {} {:5.1}%  {}/{} files  {} / {}  {}  ETA {}",
        progress_bar(snapshot.overall_fraction, BAR_WIDTH),
        snapshot.percentage(),
        snapshot.completed_files,
        snapshot.total_files,
        format_size(snapshot.transferred_bytes),
        format_size(snapshot.total_bytes),
        format_speed(snapshot.throughput_bytes_per_sec),
        format_eta(snapshot.eta_seconds),
    )
}

/// Truncate `text` to `max` characters, marking the cut with `...`.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(0), "0.00 MB/s");
        assert_eq!(format_speed(1024 * 1024), "1.00 MB/s");
        assert_eq!(format_speed(5 * 1024 * 1024 / 2), "2.50 MB/s");
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(None), "--");
        assert_eq!(format_eta(Some(0)), "about 0 s");
        assert_eq!(format_eta(Some(59)), "about 59 s");
        assert_eq!(format_eta(Some(125)), "about 2 min 5 s");
        assert_eq!(format_eta(Some(3600)), "about 1 h");
        assert_eq!(format_eta(Some(3601)), "about 2 h");
    }

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0.0, 4), "[....]");
        assert_eq!(progress_bar(0.5, 4), "[##..]");
        assert_eq!(progress_bar(1.0, 4), "[####]");
        assert_eq!(progress_bar(7.0, 4), "[####]");
        assert_eq!(progress_bar(f64::NAN, 4), "[....]");
    }

    #[test]
    fn test_progress_line() {
        let snapshot = ProgressSnapshot {
            is_active: true,
            total_files: 4,
            completed_files: 1,
            overall_fraction: 0.25,
            transferred_bytes: 1024,
            total_bytes: 4096,
            throughput_bytes_per_sec: 1024 * 1024,
            eta_seconds: Some(3),
            ..ProgressSnapshot::default()
        };
        let line = progress_line(&snapshot);
        assert!(line.contains(" 25.0%"));
        assert!(line.contains("1/4 files"));
        assert!(line.contains("1.00 MB/s"));
        assert!(line.contains("ETA about 3 s"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short.jpg", 20), "short.jpg");
        assert_eq!(truncate("a_very_long_file_name.jpg", 10), "a_very_...");
    }
}
