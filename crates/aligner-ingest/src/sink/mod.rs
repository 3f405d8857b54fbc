//! Relational sinks
//!
//! The loader talks to storage through [`ActivitySink`]: one open transaction with
//! named savepoints and insert-or-ignore writes. [`postgres::PgSink`] is the
//! production sink, [`memory::MemorySink`] backs dry runs and tests.

pub mod memory;
pub mod postgres;

pub use memory::{MemorySink, MemoryStore};
pub use postgres::{verify_schema, PgSink, PgSinkFactory};

use async_trait::async_trait;

use crate::error::SinkError;
use crate::models::{Activity, ChildRecord};

pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// A transactional, insert-or-ignore writer.
///
/// A transaction is opened implicitly by the first call after construction or after
/// [`commit`](ActivitySink::commit)/[`rollback`](ActivitySink::rollback).
#[async_trait]
pub trait ActivitySink: Send {
    async fn savepoint(&mut self, name: &'static str) -> SinkResult<()>;

    async fn release_savepoint(&mut self, name: &'static str) -> SinkResult<()>;

    /// Undo everything since `name`; the savepoint itself stays open
    async fn rollback_to_savepoint(&mut self, name: &'static str) -> SinkResult<()>;

    /// Insert the activity unless its id exists. Returns whether a row was written.
    async fn upsert_activity(&mut self, activity: &Activity) -> SinkResult<bool>;

    /// Insert the child unless its id exists. Returns whether a row was written.
    async fn upsert_child(&mut self, child: &ChildRecord) -> SinkResult<bool>;

    async fn commit(&mut self) -> SinkResult<()>;

    async fn rollback(&mut self) -> SinkResult<()>;
}

/// Opens independent sinks, one per parallel worker
#[async_trait]
pub trait SinkFactory: Send + Sync {
    type Sink: ActivitySink + 'static;

    async fn open(&self) -> SinkResult<Self::Sink>;
}
