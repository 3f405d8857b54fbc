//! Pipelined parallel importer
//!
//! A blocking reader task cuts the source into batches of `batch_size` rows and feeds
//! them through a bounded channel; at most `max_in_flight_batches` batches wait in
//! memory. Up to `workers` batches are loaded concurrently, each on its own sink and
//! transaction, committed once at the end of the batch. Inserts are idempotent, so
//! batch completion order does not matter.

use futures::StreamExt;
use std::io::Read;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ImportConfig;
use crate::controller::{ErrorReporter, ImportSummary};
use crate::error::{IngestError, Result};
use crate::loader::load_row;
use crate::progress::ProgressReporter;
use crate::reader::{ReadResult, RecordReader};
use crate::sink::{ActivitySink, SinkFactory};

type Batch = Vec<(u64, ReadResult)>;

pub struct ParallelImporter<F> {
    config: ImportConfig,
    factory: F,
    cancel: CancellationToken,
    total: Option<u64>,
}

impl<F: SinkFactory> ParallelImporter<F> {
    pub fn new(config: ImportConfig, factory: F) -> Self {
        Self {
            config,
            factory,
            cancel: CancellationToken::new(),
            total: None,
        }
    }

    /// Stop pulling batches once `token` fires; in-flight batches commit what they have
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_total(mut self, total: Option<u64>) -> Self {
        self.total = total;
        self
    }

    /// Import the configured source file
    pub async fn run(self) -> Result<ImportSummary> {
        let reader = RecordReader::open(&self.config.source, self.config.field_size_limit)?;
        info!(
            source = %self.config.source.display(),
            workers = self.config.workers,
            batch_size = self.config.batch_size,
            "Starting parallel import"
        );
        self.run_reader(reader).await
    }

    pub async fn run_reader<R>(self, reader: RecordReader<R>) -> Result<ImportSummary>
    where
        R: Read + Send + 'static,
    {
        let workers = self.config.workers.max(1);
        let (tx, rx) = mpsc::channel::<Batch>(self.config.max_in_flight_batches.max(1));
        let reader_task = spawn_reader(reader, tx, self.config.batch_size.max(1), self.cancel.clone());

        let errors = ErrorReporter::new(self.config.max_reported_errors);
        let mut progress = ProgressReporter::new(
            self.total,
            self.config.progress_interval,
            self.config.show_progress_bar,
        );
        let mut summary = ImportSummary::default();

        let factory = &self.factory;
        let cancel = &self.cancel;
        let reporter = &errors;
        let mut batches = Box::pin(
            ReceiverStream::new(rx)
                .take_until(self.cancel.clone().cancelled_owned())
                .map(move |batch| import_batch(factory, batch, cancel, reporter))
                .buffer_unordered(workers),
        );

        while let Some(result) = batches.next().await {
            let batch = result?;
            summary.merge(&batch);
            progress.update(summary.rows_read);
        }

        // Release the channel so a reader blocked on a full queue can exit
        drop(batches);

        let rows_read = reader_task
            .await
            .map_err(|e| IngestError::Worker(e.to_string()))??;
        debug!(rows_read, rows_loaded = summary.rows_read, "Reader finished");

        progress.finish();
        errors.finish();

        summary.cancelled |= self.cancel.is_cancelled();
        summary.errors_reported = errors.reported();
        summary.elapsed = progress.elapsed();
        Ok(summary)
    }
}

fn spawn_reader<R>(
    mut reader: RecordReader<R>,
    tx: mpsc::Sender<Batch>,
    batch_size: usize,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<Result<u64>>
where
    R: Read + Send + 'static,
{
    tokio::task::spawn_blocking(move || -> Result<u64> {
        while !cancel.is_cancelled() {
            let chunk = reader.next_chunk(batch_size)?;
            if chunk.is_empty() {
                break;
            }
            if tx.blocking_send(chunk).is_err() {
                break;
            }
        }
        Ok(reader.rows_read())
    })
}

/// Load one batch on a fresh sink and commit it
async fn import_batch<F: SinkFactory>(
    factory: &F,
    batch: Batch,
    cancel: &CancellationToken,
    errors: &ErrorReporter,
) -> Result<ImportSummary> {
    let mut sink = factory.open().await?;
    let mut summary = ImportSummary::default();

    for (line, read) in batch {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            break;
        }
        summary.rows_read += 1;

        let loaded = match read {
            Ok(row) => load_row(&mut sink, &row).await,
            Err(e) => Err(e),
        };

        match loaded {
            Ok(outcome) => summary.record(&outcome),
            // Dropping the sink rolls the batch back
            Err(e) if e.is_fatal() => return Err(IngestError::Aborted { line, source: e }),
            Err(e) => {
                summary.errored += 1;
                errors.report(line, &e);
            },
        }
    }

    sink.commit().await?;
    Ok(summary)
}
