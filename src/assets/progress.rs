use std::io::IsTerminal;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use super::config::AssetConfig;

const MIB: f64 = 1024.0 * 1024.0;

/// Receives download progress from a downloader.
pub trait ProgressSink: Send {
    fn begin(&mut self, _total_bytes: Option<u64>) {}
    fn update(&mut self, downloaded: u64);
    fn finish(&mut self, _downloaded: u64) {}
}

pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn update(&mut self, _downloaded: u64) {}
}

/// Logs one line per report, for non-interactive runs.
pub struct LogProgress {
    label: String,
    total: Option<u64>,
}

impl LogProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            total: None,
        }
    }
}

impl ProgressSink for LogProgress {
    fn begin(&mut self, total_bytes: Option<u64>) {
        self.total = total_bytes;
    }

    fn update(&mut self, downloaded: u64) {
        match self.total {
            Some(total) if total > 0 => info!(
                "{}: {:.1} / {:.1} MiB ({:.0}%)",
                self.label,
                downloaded as f64 / MIB,
                total as f64 / MIB,
                downloaded as f64 * 100.0 / total as f64
            ),
            _ => info!("{}: {:.1} MiB", self.label, downloaded as f64 / MIB),
        }
    }

    fn finish(&mut self, downloaded: u64) {
        info!(
            "{}: finished, {:.1} MiB",
            self.label,
            downloaded as f64 / MIB
        );
    }
}

/// Live terminal bar.
pub struct BarProgress {
    label: String,
    bar: Option<ProgressBar>,
}

impl BarProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            bar: None,
        }
    }
}

impl ProgressSink for BarProgress {
    fn begin(&mut self, total_bytes: Option<u64>) {
        let bar = match total_bytes {
            Some(total) => {
                let bar = ProgressBar::new(total);
                bar.set_style(
                    ProgressStyle::with_template(
                        "{msg} [{bar:30}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=> "),
                );
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::with_template("{spinner} {msg} {bytes} ({bytes_per_sec})")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                bar
            }
        };
        bar.set_message(self.label.clone());
        self.bar = Some(bar);
    }

    fn update(&mut self, downloaded: u64) {
        if let Some(bar) = &self.bar {
            bar.set_position(downloaded);
        }
    }

    fn finish(&mut self, downloaded: u64) {
        if let Some(bar) = self.bar.take() {
            bar.set_position(downloaded);
            bar.finish_and_clear();
        }
    }
}

/// Picks the sink for an asset: nothing if reporting is off, a bar on a
/// terminal, log lines otherwise.
pub fn progress_for(config: &AssetConfig) -> Box<dyn ProgressSink> {
    if !config.progress_report {
        return Box::new(SilentProgress);
    }
    let label = format!("{} ({})", config.name, config.version);
    if std::io::stderr().is_terminal() {
        Box::new(BarProgress::new(label))
    } else {
        Box::new(LogProgress::new(label))
    }
}

/// Decides when a byte count has crossed the next reporting threshold.
#[derive(Debug, Clone)]
pub struct ReportCadence {
    interval: u64,
    next: u64,
}

impl ReportCadence {
    pub fn new(interval_bytes: u64) -> Self {
        let interval = interval_bytes.max(1);
        Self {
            interval,
            next: interval,
        }
    }

    pub fn due(&mut self, downloaded: u64) -> bool {
        if downloaded < self.next {
            return false;
        }
        while self.next <= downloaded {
            self.next += self.interval;
        }
        true
    }
}
