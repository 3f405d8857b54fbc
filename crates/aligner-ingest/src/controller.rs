//! Sequential batch controller
//!
//! Drives rows from the reader through the loader on a single sink, committing every
//! `commit_interval` rows. Rows move `Reading -> Coercing -> Loading` and end up
//! committed, skipped (duplicate id) or errored.

use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ImportConfig;
use crate::error::{IngestError, Result, RowError};
use crate::loader::{load_row, ChildOutcome, LoadOutcome, PayloadStatus};
use crate::progress::ProgressReporter;
use crate::reader::RecordReader;
use crate::sink::ActivitySink;

/// Totals for one import run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub rows_read: u64,
    /// Activities newly written
    pub imported: u64,
    /// Activities whose id was already stored
    pub skipped: u64,
    /// Rows rejected as a whole
    pub errored: u64,
    pub children_inserted: u64,
    pub children_failed: u64,
    pub malformed_payloads: u64,
    pub unrecognized_payloads: u64,
    /// Row errors logged individually
    pub errors_reported: u64,
    pub elapsed: Duration,
    pub cancelled: bool,
}

impl ImportSummary {
    pub fn record(&mut self, outcome: &LoadOutcome) {
        if outcome.inserted {
            self.imported += 1;
        } else {
            self.skipped += 1;
        }

        match outcome.payload {
            PayloadStatus::Malformed => self.malformed_payloads += 1,
            PayloadStatus::Unrecognized(_) => self.unrecognized_payloads += 1,
            PayloadStatus::Empty | PayloadStatus::Entity(_) => {},
        }

        match outcome.child {
            ChildOutcome::Inserted(_) => self.children_inserted += 1,
            ChildOutcome::Failed(_) => self.children_failed += 1,
            ChildOutcome::NotApplicable
            | ChildOutcome::AlreadyPresent(_)
            | ChildOutcome::Skipped => {},
        }
    }

    /// Fold a worker's counters into the run totals
    pub fn merge(&mut self, other: &ImportSummary) {
        self.rows_read += other.rows_read;
        self.imported += other.imported;
        self.skipped += other.skipped;
        self.errored += other.errored;
        self.children_inserted += other.children_inserted;
        self.children_failed += other.children_failed;
        self.malformed_payloads += other.malformed_payloads;
        self.unrecognized_payloads += other.unrecognized_payloads;
        self.cancelled |= other.cancelled;
    }

    pub fn log(&self) {
        info!(
            rows_read = self.rows_read,
            imported = self.imported,
            skipped = self.skipped,
            errored = self.errored,
            children_inserted = self.children_inserted,
            children_failed = self.children_failed,
            malformed_payloads = self.malformed_payloads,
            unrecognized_payloads = self.unrecognized_payloads,
            elapsed_secs = self.elapsed.as_secs_f64(),
            cancelled = self.cancelled,
            "Import {}: {} imported, {} skipped, {} errors in {}",
            if self.cancelled { "cancelled" } else { "complete" },
            self.imported,
            self.skipped,
            self.errored,
            crate::progress::format_duration(self.elapsed)
        );
    }
}

/// Logs the first `max` row errors individually, counts the rest.
///
/// Shared by reference between parallel workers.
#[derive(Debug)]
pub struct ErrorReporter {
    max: usize,
    seen: AtomicUsize,
}

impl ErrorReporter {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            seen: AtomicUsize::new(0),
        }
    }

    pub fn report(&self, line: u64, err: &RowError) {
        let seen = self.seen.fetch_add(1, Ordering::Relaxed);
        if seen < self.max {
            error!(line, stage = %err.stage(), error = %err, "Row skipped");
        } else if seen == self.max {
            warn!(
                max_reported = self.max,
                "Further row errors are counted but not logged"
            );
        }
    }

    /// Errors logged individually so far
    pub fn reported(&self) -> u64 {
        self.seen.load(Ordering::Relaxed).min(self.max) as u64
    }

    /// Errors counted without being logged
    pub fn suppressed(&self) -> u64 {
        self.seen.load(Ordering::Relaxed).saturating_sub(self.max) as u64
    }

    pub fn finish(&self) {
        let suppressed = self.suppressed();
        if suppressed > 0 {
            warn!(suppressed, "{} row errors were not logged individually", suppressed);
        }
    }
}

/// Single-writer import over one sink
pub struct BatchController<S> {
    config: ImportConfig,
    sink: S,
    cancel: CancellationToken,
    total: Option<u64>,
}

impl<S: ActivitySink> BatchController<S> {
    pub fn new(config: ImportConfig, sink: S) -> Self {
        Self {
            config,
            sink,
            cancel: CancellationToken::new(),
            total: None,
        }
    }

    /// Stop between rows once `token` fires
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Expected row count, for percentages and ETA
    pub fn with_total(mut self, total: Option<u64>) -> Self {
        self.total = total;
        self
    }

    /// Import the configured source file
    pub async fn run(self) -> Result<ImportSummary> {
        let reader = RecordReader::open(&self.config.source, self.config.field_size_limit)?;
        info!(source = %self.config.source.display(), "Starting sequential import");
        self.run_reader(reader).await
    }

    /// Import every row of `reader`
    pub async fn run_reader<R: Read>(mut self, mut reader: RecordReader<R>) -> Result<ImportSummary> {
        let commit_interval = self.config.commit_interval.max(1);
        let errors = ErrorReporter::new(self.config.max_reported_errors);
        let mut progress = ProgressReporter::new(
            self.total,
            self.config.progress_interval,
            self.config.show_progress_bar,
        );
        let mut summary = ImportSummary::default();
        let mut uncommitted = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                info!(rows_read = summary.rows_read, "Cancellation requested, committing and stopping");
                summary.cancelled = true;
                break;
            }

            let Some(read) = reader.next_row()? else {
                break;
            };
            summary.rows_read += 1;
            let line = reader.rows_read();

            let loaded = match read {
                Ok(row) => load_row(&mut self.sink, &row).await,
                Err(e) => Err(e),
            };

            match loaded {
                Ok(outcome) => summary.record(&outcome),
                Err(e) if e.is_fatal() => {
                    progress.finish();
                    return Err(IngestError::Aborted { line, source: e });
                },
                Err(e) => {
                    summary.errored += 1;
                    errors.report(line, &e);
                },
            }

            uncommitted += 1;
            if uncommitted >= commit_interval {
                self.sink.commit().await?;
                debug!(rows_read = summary.rows_read, "Committed batch");
                uncommitted = 0;
            }

            progress.update(summary.rows_read);
        }

        self.sink.commit().await?;
        progress.finish();
        errors.finish();

        summary.errors_reported = errors.reported();
        summary.elapsed = progress.elapsed();
        Ok(summary)
    }
}
