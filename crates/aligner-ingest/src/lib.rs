//! Aligner Ingest Library
//!
//! Imports the clinical activity export into PostgreSQL. Each source row becomes one
//! `activities` row; its embedded JSON payload is decomposed into at most one child
//! row in `af_setups`, `treatments`, `invoices`, `retainers` or `prescriptions`.
//!
//! # Pipeline
//!
//! - [`reader`]: streams raw records from the export
//! - [`coerce`]: typed, never-failing field conversions
//! - [`payload`]: decodes the embedded payload and its discriminator
//! - [`importers`]: one child-row builder per payload variant
//! - [`loader`]: per-row savepoints, activity then child
//! - [`controller`] and [`parallel`]: sequential and pipelined batch drivers
//! - [`sink`]: Postgres and in-memory storage behind one trait
//! - [`query`]: read-only SQL and canned lookups over the imported tables
//!
//! Every write is insert-or-ignore, so re-running an import is always safe.
//!
//! # Example
//!
//! ```no_run
//! use aligner_ingest::{config::ImportConfig, controller::BatchController, sink::PgSink};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ImportConfig::load()?.with_source("./exports/activities.csv");
//!     let pool = config.database.connect().await?;
//!     aligner_ingest::sink::verify_schema(&pool).await?;
//!
//!     let summary = BatchController::new(config, PgSink::new(pool)).run().await?;
//!     summary.log();
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod coerce;
pub mod config;
pub mod controller;
pub mod error;
pub mod importers;
pub mod loader;
pub mod models;
pub mod parallel;
pub mod payload;
pub mod progress;
pub mod query;
pub mod reader;
pub mod sink;

pub use config::ImportConfig;
pub use controller::{BatchController, ImportSummary};
pub use error::{IngestError, Result};
pub use parallel::ParallelImporter;
