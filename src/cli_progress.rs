/*!
 * Terminal progress for a running scan
 *
 * Polls a [`ScanHandle`] and renders its snapshot as an indicatif bar, printing
 * drained log entries above the bar as they arrive.
 */

use crate::scan::handle::ScanHandle;
use crate::scan::progress::{LogEntry, ProgressSnapshot, Severity};
use crate::scan::types::ScanPhase;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const LOGS_PER_POLL: usize = 64;
const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}";

/// Renders scan progress until the scan finishes
pub struct ScanProgressRenderer {
    handle: ScanHandle,
    bar: ProgressBar,
    show_progress: bool,
}

impl ScanProgressRenderer {
    pub fn new(handle: ScanHandle, show_progress: bool) -> Self {
        let bar = if show_progress {
            let bar = ProgressBar::new(0);
            let style = ProgressStyle::default_bar()
                .template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-");
            bar.set_style(style);
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        } else {
            ProgressBar::hidden()
        };

        Self {
            handle,
            bar,
            show_progress,
        }
    }

    /// Poll until the scan has a summary, then flush the remaining logs
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            ticker.tick().await;
            self.render(&self.handle.progress());
            self.print_logs();
            if self.handle.is_finished() {
                break;
            }
        }

        let snap = self.handle.progress();
        self.render(&snap);
        self.print_logs();
        self.bar.finish_with_message(format!(
            "{} | {} accepted, {} failed",
            snap.phase, snap.accepted, snap.failed
        ));
    }

    fn render(&self, snap: &ProgressSnapshot) {
        if !self.show_progress {
            return;
        }
        self.bar.set_length(snap.total as u64);
        self.bar.set_position(snap.completed as u64);
        let message = match snap.phase {
            ScanPhase::Discovering => "discovering candidates".to_string(),
            _ => format!(
                "{} | {} accepted, {} failed, {} retries | {:.2} items/s",
                snap.phase, snap.accepted, snap.failed, snap.retries, snap.throughput
            ),
        };
        self.bar.set_message(message);
    }

    fn print_logs(&self) {
        loop {
            let entries = self.handle.recent_logs(LOGS_PER_POLL);
            if entries.is_empty() {
                break;
            }
            for entry in &entries {
                let line = format_entry(entry);
                if self.show_progress {
                    self.bar.println(line);
                } else {
                    println!("{}", line);
                }
            }
        }
    }
}

/// One log line as shown in the terminal
pub fn format_entry(entry: &LogEntry) -> String {
    let marker = match entry.level {
        Severity::Info => "·",
        Severity::Success => "✓",
        Severity::Warning => "!",
        Severity::Error => "✗",
    };
    format!(
        "{} {} {}",
        entry.timestamp.format("%H:%M:%S"),
        marker,
        entry.message
    )
}
