//! Progress accounting for long imports
//!
//! Throughput and ETA are extrapolated from the rows processed so far. Reports go to
//! the log every `interval` rows, with an optional terminal progress bar.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};
use tracing::info;

/// Point-in-time progress figures
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub processed: u64,
    pub total: Option<u64>,
    pub elapsed: Duration,
    /// Rows per second
    pub rate: f64,
    pub percent: Option<f64>,
    pub eta: Option<Duration>,
}

impl ProgressSnapshot {
    pub fn compute(processed: u64, total: Option<u64>, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 { processed as f64 / secs } else { 0.0 };

        let percent = total
            .filter(|t| *t > 0)
            .map(|t| (processed as f64 / t as f64 * 100.0).min(100.0));

        let eta = match total {
            Some(t) if rate > 0.0 => {
                Some(Duration::from_secs_f64(t.saturating_sub(processed) as f64 / rate))
            },
            _ => None,
        };

        Self {
            processed,
            total,
            elapsed,
            rate,
            percent,
            eta,
        }
    }
}

impl std::fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.total, self.percent) {
            (Some(total), Some(percent)) => {
                write!(f, "{}/{} rows ({:.1}%)", self.processed, total, percent)?
            },
            _ => write!(f, "{} rows", self.processed)?,
        }
        write!(
            f,
            ", {} elapsed, {:.1} rows/s",
            format_duration(self.elapsed),
            self.rate
        )?;
        if let Some(eta) = self.eta {
            write!(f, ", ETA {}", format_duration(eta))?;
        }
        Ok(())
    }
}

/// Format a duration as `1h02m03s`, `2m03s` or `3.4s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

fn create_progress_bar(total: Option<u64>) -> ProgressBar {
    let pb = match total {
        Some(total) => ProgressBar::new(total),
        None => ProgressBar::new_spinner(),
    };
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({per_sec}, {eta})")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

/// Periodic progress reporter
pub struct ProgressReporter {
    total: Option<u64>,
    interval: u64,
    started: Instant,
    next_report: u64,
    bar: Option<ProgressBar>,
}

impl ProgressReporter {
    pub fn new(total: Option<u64>, interval: u64, show_bar: bool) -> Self {
        let interval = interval.max(1);
        Self {
            total,
            interval,
            started: Instant::now(),
            next_report: interval,
            bar: show_bar.then(|| create_progress_bar(total)),
        }
    }

    /// Record the running row count; logs once per interval
    pub fn update(&mut self, processed: u64) {
        if let Some(bar) = &self.bar {
            bar.set_position(processed);
        }
        if processed >= self.next_report {
            let snapshot = self.snapshot(processed);
            info!(
                processed = snapshot.processed,
                rate = snapshot.rate,
                "Progress: {}",
                snapshot
            );
            self.next_report = (processed / self.interval + 1) * self.interval;
        }
    }

    pub fn snapshot(&self, processed: u64) -> ProgressSnapshot {
        ProgressSnapshot::compute(processed, self.total, self.started.elapsed())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_rate_and_eta() {
        let snapshot = ProgressSnapshot::compute(1000, Some(5000), Duration::from_secs(10));
        assert_eq!(snapshot.rate, 100.0);
        assert_eq!(snapshot.percent, Some(20.0));
        assert_eq!(snapshot.eta, Some(Duration::from_secs(40)));
        assert_eq!(
            snapshot.to_string(),
            "1000/5000 rows (20.0%), 10.0s elapsed, 100.0 rows/s, ETA 40.0s"
        );
    }

    #[test]
    fn test_snapshot_without_total() {
        let snapshot = ProgressSnapshot::compute(42, None, Duration::from_secs(2));
        assert_eq!(snapshot.percent, None);
        assert_eq!(snapshot.eta, None);
        assert_eq!(snapshot.to_string(), "42 rows, 2.0s elapsed, 21.0 rows/s");
    }

    #[test]
    fn test_snapshot_at_start() {
        let snapshot = ProgressSnapshot::compute(0, Some(10), Duration::ZERO);
        assert_eq!(snapshot.rate, 0.0);
        assert_eq!(snapshot.eta, None);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(3400)), "3.4s");
        assert_eq!(format_duration(Duration::from_secs(123)), "2m03s");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h02m03s");
    }

    #[test]
    fn test_reporter_tracks_bar_position() {
        let mut reporter = ProgressReporter::new(Some(100), 10, true);
        reporter.update(25);
        assert_eq!(reporter.bar.as_ref().unwrap().position(), 25);
        assert_eq!(reporter.next_report, 30);
        reporter.finish();
    }
}
