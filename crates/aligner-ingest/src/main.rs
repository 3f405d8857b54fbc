//! Aligner Ingest - activity export importer and query tool

use aligner_common::logging::{init_logging, LogConfig, LogLevel};
use aligner_ingest::query::{self, CannedQuery, DISPLAY_LIMIT};
use aligner_ingest::reader::count_records;
use aligner_ingest::sink::{verify_schema, MemoryStore, PgSink, PgSinkFactory};
use aligner_ingest::{BatchController, ImportConfig, ImportSummary, ParallelImporter};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sqlx::PgPool;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "aligner-ingest")]
#[command(author, version, about = "Clinical activity import and query tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Database connection string
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import an activity export
    Import(ImportArgs),

    /// Count data records in an export
    Count {
        /// Export file
        source: PathBuf,
    },

    /// Run a read-only SELECT/WITH statement
    Query {
        /// SQL to execute
        sql: String,
    },

    /// Activity totals and date range
    Stats,

    /// Top 50 activity types
    ByType,

    /// Top 50 dentists by activity count
    ByDentist,

    /// Activities of one patient
    Patient {
        /// Patient id
        patient_id: i64,
    },

    /// Tables and columns of the public schema
    Schema,

    /// Activities whose payload names a variant but which have no child row
    Reconcile,
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Export file
    #[arg(env = "ALIGNER_SOURCE")]
    source: Option<PathBuf>,

    /// Concurrent batches; 1 imports sequentially
    #[arg(short, long)]
    workers: Option<usize>,

    /// Rows per transaction (sequential import)
    #[arg(long)]
    commit_interval: Option<usize>,

    /// Rows per batch (parallel import)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Rows between progress reports
    #[arg(long)]
    progress_interval: Option<u64>,

    /// Per-field size limit in bytes
    #[arg(long)]
    field_size_limit: Option<usize>,

    /// Row errors logged individually
    #[arg(long)]
    max_reported_errors: Option<usize>,

    /// Show a terminal progress bar
    #[arg(long)]
    progress_bar: bool,

    /// Decode and load into memory only, without a database
    #[arg(long)]
    dry_run: bool,
}

impl ImportArgs {
    fn apply(&self, mut config: ImportConfig) -> ImportConfig {
        if let Some(source) = &self.source {
            config = config.with_source(source.clone());
        }
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(rows) = self.commit_interval {
            config = config.with_commit_interval(rows);
        }
        if let Some(rows) = self.batch_size {
            config = config.with_batch_size(rows);
        }
        if let Some(rows) = self.progress_interval {
            config = config.with_progress_interval(rows);
        }
        if let Some(bytes) = self.field_size_limit {
            config = config.with_field_size_limit(bytes);
        }
        if let Some(count) = self.max_reported_errors {
            config = config.with_max_reported_errors(count);
        }
        config.with_progress_bar(self.progress_bar)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("aligner-ingest")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    let mut config = ImportConfig::from_env();
    if let Some(url) = &cli.database_url {
        config = config.with_database_url(url.clone());
    }

    match cli.command {
        Command::Import(args) => {
            let config = args.apply(config);
            config.validate().context("Invalid import configuration")?;
            let summary = import(config, args.dry_run).await?;
            summary.log();
        },
        Command::Count { source } => {
            let total = count_records(&source)
                .with_context(|| format!("Failed to count records in {}", source.display()))?;
            info!(source = %source.display(), records = total, "Counted records");
        },
        Command::Query { sql } => {
            let pool = connect(&config).await?;
            let result = query::execute(&pool, &sql).await?;
            info!("\n{}", result.render(DISPLAY_LIMIT));
        },
        Command::Stats => canned(&config, CannedQuery::Stats).await?,
        Command::ByType => canned(&config, CannedQuery::ByType).await?,
        Command::ByDentist => canned(&config, CannedQuery::ByDentist).await?,
        Command::Patient { patient_id } => canned(&config, CannedQuery::Patient(patient_id)).await?,
        Command::Schema => canned(&config, CannedQuery::Schema).await?,
        Command::Reconcile => canned(&config, CannedQuery::Reconcile).await?,
    }

    Ok(())
}

async fn connect(config: &ImportConfig) -> Result<PgPool> {
    config.database.validate()?;
    let pool = config
        .database
        .connect()
        .await
        .context("Failed to connect to database")?;
    info!("Database connection pool established");
    Ok(pool)
}

async fn canned(config: &ImportConfig, query: CannedQuery) -> Result<()> {
    let pool = connect(config).await?;
    let result = query.run(&pool).await?;
    info!("\n{}", result.render(DISPLAY_LIMIT));
    Ok(())
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight rows");
            token.cancel();
        }
    });
}

async fn import(config: ImportConfig, dry_run: bool) -> Result<ImportSummary> {
    let pool = if dry_run {
        info!("Dry run: loading into memory only");
        None
    } else {
        let pool = connect(&config).await?;
        verify_schema(&pool).await.context("Schema check failed")?;
        Some(pool)
    };

    let total = count_records(&config.source)
        .with_context(|| format!("Cannot read source {}", config.source.display()))?;
    info!(source = %config.source.display(), records = total, "Source opened");

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    match pool {
        Some(pool) => {
            let sink = PgSink::new(pool.clone());
            run_import(config, sink, PgSinkFactory::new(pool), Some(total), cancel).await
        },
        None => {
            let store = MemoryStore::new();
            run_import(config, store.sink(), store, Some(total), cancel).await
        },
    }
}

async fn run_import<S, F>(
    config: ImportConfig,
    sink: S,
    factory: F,
    total: Option<u64>,
    cancel: CancellationToken,
) -> Result<ImportSummary>
where
    S: aligner_ingest::sink::ActivitySink,
    F: aligner_ingest::sink::SinkFactory,
{
    let summary = if config.workers > 1 {
        ParallelImporter::new(config, factory)
            .with_cancellation(cancel)
            .with_total(total)
            .run()
            .await
    } else {
        BatchController::new(config, sink)
            .with_cancellation(cancel)
            .with_total(total)
            .run()
            .await
    };

    summary.context("Import aborted")
}
