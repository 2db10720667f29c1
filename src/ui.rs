//! Terminal output for `jobwatch watch`: a spinner while the race runs and
//! a coloured verdict afterwards.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::client::Resolution;
use crate::error::WatchError;

pub struct WatchProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl WatchProgress {
    pub fn start(server_url: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("waiting for job at {server_url}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    pub fn resolved(&self, resolution: &Resolution) {
        self.pb.finish_and_clear();
        println!(
            "  {} Job {} (via {}, {}ms)",
            self.green.apply_to("✓"),
            resolution.status,
            resolution.source,
            resolution.duration_ms
        );
    }

    /// Timeouts show the stale status in yellow; anything else is a failure.
    pub fn failed(&self, err: &WatchError) {
        self.pb.finish_and_clear();
        match err.fallback() {
            Some(fallback) => {
                let last = fallback.map(|s| s.to_string()).unwrap_or_else(|| "unknown".into());
                println!(
                    "  {} Timed out; last known status: {last} (not authoritative)",
                    self.yellow.apply_to("⏱")
                );
            }
            None => println!("  {} {err}", self.red.apply_to("✗")),
        }
    }

    pub fn print_record(&self, resolution: &Resolution) {
        println!();
        println!("{}", self.green.apply_to("─── Resolution ───"));
        println!(
            "{}",
            serde_json::to_string_pretty(resolution).unwrap_or_default()
        );
    }
}
