// Report rendering for the controller thread
//
// A renderer consumes the (report, progress) events a detached worker
// publishes and turns them into per-block lines or a progress bar.

use crate::procedure::{BlockReport, DetachedRun, Event, Progress};
use crate::SECTOR_SIZE;
use std::io::{self, Write};
use std::time::{Duration, Instant};

#[cfg(feature = "progress-bars")]
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// How block reports reach the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// One line per block
    Lines,
    /// Single redrawn bar; failed blocks are still printed above it
    Bar,
    /// Nothing per block
    Quiet,
}

/// `LBA #n OK in t mcs. Progress a/b`
pub fn format_block_line(report: &BlockReport, progress: Progress) -> String {
    let mut line = format!(
        "LBA #{} {} in {} mcs. Progress {}/{}",
        report.lba,
        report.status,
        report.elapsed.as_micros(),
        progress.done,
        progress.total
    );
    if report.write_failed {
        line.push_str(" (write failed)");
    }
    line
}

pub struct ProgressRenderer {
    mode: RenderMode,
    started: Instant,
    /// Sectors already done when rendering began; excluded from the rate
    baseline: u64,
    last: Progress,
    failed_blocks: u64,
    #[cfg(feature = "progress-bars")]
    bar: Option<ProgressBar>,
}

impl ProgressRenderer {
    pub fn new(mode: RenderMode, initial: Progress) -> Self {
        #[cfg(feature = "progress-bars")]
        let bar = (mode == RenderMode::Bar).then(|| {
            let bar = ProgressBar::with_draw_target(Some(initial.total), ProgressDrawTarget::stderr());
            bar.set_style(
                ProgressStyle::with_template(
                    "{spinner} [{elapsed_precise}] [{wide_bar}] {pos}/{len} sectors {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
            );
            bar.set_position(initial.done);
            bar
        });

        Self {
            mode,
            started: Instant::now(),
            baseline: initial.done,
            last: initial,
            failed_blocks: 0,
            #[cfg(feature = "progress-bars")]
            bar,
        }
    }

    pub fn failed_blocks(&self) -> u64 {
        self.failed_blocks
    }

    pub fn last_progress(&self) -> Progress {
        self.last
    }

    /// Bytes per second over the sectors processed by this renderer
    pub fn rate(&self) -> f64 {
        let secs = self.started.elapsed().as_secs_f64().max(0.0001);
        let sectors = self.last.done.saturating_sub(self.baseline);
        (sectors * SECTOR_SIZE) as f64 / secs
    }

    /// Remaining time at the current rate, if a rate is known
    pub fn eta(&self) -> Option<Duration> {
        let rate = self.rate();
        if rate <= 0.0 {
            return None;
        }
        let remaining = self.last.total.saturating_sub(self.last.done) * SECTOR_SIZE;
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }

    pub fn on_event(&mut self, event: &Event) {
        self.last = event.progress;
        let failed = !event.report.status.is_ok();
        if failed {
            self.failed_blocks += 1;
        }

        match self.mode {
            RenderMode::Quiet => {}
            RenderMode::Lines => self.print_line(event),
            RenderMode::Bar => {
                if !self.update_bar(event, failed) {
                    self.print_line(event);
                }
            }
        }
    }

    /// Render every event until the worker disconnects the queue
    pub fn drain<P>(&mut self, run: &DetachedRun<P>) {
        for event in run.events().iter() {
            self.on_event(&event);
        }
    }

    #[cfg(feature = "progress-bars")]
    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(format!("{} failed blocks", self.failed_blocks));
        }
    }

    #[cfg(not(feature = "progress-bars"))]
    pub fn finish(&self) {}

    #[cfg(feature = "progress-bars")]
    fn update_bar(&self, event: &Event, failed: bool) -> bool {
        let Some(bar) = &self.bar else {
            return false;
        };
        if failed {
            bar.println(format_block_line(&event.report, event.progress));
        }
        bar.set_position(event.progress.done);
        bar.set_message(format!("{}/s", human_bytes(self.rate())));
        true
    }

    #[cfg(not(feature = "progress-bars"))]
    fn update_bar(&self, _event: &Event, _failed: bool) -> bool {
        false
    }

    fn print_line(&self, event: &Event) {
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "{}", format_block_line(&event.report, event.progress));
    }
}

/// Bytes (or bytes per second) in binary units
pub fn human_bytes(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes.is_nan() || bytes <= 0.0 {
        return "0 B".to_string();
    }
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", value as u64)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// H:MM:SS, or M:SS under an hour
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}
