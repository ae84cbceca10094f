//! Run progress display with progress bars.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Packet run progress tracker
pub struct RunProgress {
    bar: ProgressBar,
}

impl RunProgress {
    /// Create a new progress tracker
    #[must_use]
    pub fn new(total_packets: u64, target: &str) -> Self {
        let bar = ProgressBar::new(total_packets);

        let style = ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} packets ({per_sec}, {eta})")
            .map(|s| s.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);

        bar.set_message(format!("Driving packets through {target}"));

        Self { bar }
    }

    /// One more packet finished
    pub fn inc(&self) {
        self.bar.inc(1);
    }

    /// Print a line above the bar
    pub fn println(&self, msg: impl AsRef<str>) {
        self.bar.println(msg);
    }

    /// Finish with custom message
    pub fn finish_with_message(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }
}

/// Format a packet rate
///
/// # Example
///
/// ```
/// use recipe_cli::progress::format_rate;
/// use std::time::Duration;
///
/// assert_eq!(format_rate(500, Duration::from_secs(2)), "250.0 packets/s");
/// ```
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_rate(packets: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return "- packets/s".to_string();
    }
    format!("{:.1} packets/s", packets as f64 / secs)
}

/// Format duration in human-readable format
///
/// # Example
///
/// ```
/// use recipe_cli::progress::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// ```
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
