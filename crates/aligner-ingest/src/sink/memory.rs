//! In-memory sink
//!
//! Mirrors the insert-or-ignore and savepoint semantics of the Postgres sink over
//! shared maps. Writes stay pending until commit, so a dropped or rolled back sink
//! leaves the store untouched.

use aligner_common::EntityKind;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ActivitySink, SinkFactory, SinkResult};
use crate::error::SinkError;
use crate::models::{Activity, ChildRecord};

/// Committed table contents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTables {
    pub activities: BTreeMap<i64, Activity>,
    pub children: BTreeMap<EntityKind, BTreeMap<i64, ChildRecord>>,
}

impl MemoryTables {
    fn has_child(&self, child: &ChildRecord) -> bool {
        self.children
            .get(&child.kind)
            .is_some_and(|rows| rows.contains_key(&child.id))
    }

    fn apply(&mut self, write: PendingWrite) {
        match write {
            PendingWrite::Activity(activity) => {
                self.activities.entry(activity.activity_id).or_insert(activity);
            },
            PendingWrite::Child(child) => {
                self.children
                    .entry(child.kind)
                    .or_default()
                    .entry(child.id)
                    .or_insert(child);
            },
        }
    }
}

/// Shared handle to the committed tables
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<MemoryTables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new sink with its own pending transaction
    pub fn sink(&self) -> MemorySink {
        MemorySink {
            store: self.clone(),
            pending: Vec::new(),
            savepoints: Vec::new(),
        }
    }

    fn lock(&self) -> SinkResult<MutexGuard<'_, MemoryTables>> {
        self.tables
            .lock()
            .map_err(|_| SinkError::Unavailable("memory store lock poisoned".to_string()))
    }

    /// Copy of the committed tables
    pub fn snapshot(&self) -> SinkResult<MemoryTables> {
        Ok(self.lock()?.clone())
    }

    pub fn activity(&self, activity_id: i64) -> SinkResult<Option<Activity>> {
        Ok(self.lock()?.activities.get(&activity_id).cloned())
    }

    pub fn child(&self, kind: EntityKind, id: i64) -> SinkResult<Option<ChildRecord>> {
        Ok(self
            .lock()?
            .children
            .get(&kind)
            .and_then(|rows| rows.get(&id))
            .cloned())
    }

    pub fn activity_count(&self) -> SinkResult<usize> {
        Ok(self.lock()?.activities.len())
    }

    pub fn child_count(&self, kind: EntityKind) -> SinkResult<usize> {
        Ok(self.lock()?.children.get(&kind).map_or(0, BTreeMap::len))
    }
}

#[async_trait]
impl SinkFactory for MemoryStore {
    type Sink = MemorySink;

    async fn open(&self) -> SinkResult<MemorySink> {
        Ok(self.sink())
    }
}

#[derive(Debug, Clone)]
enum PendingWrite {
    Activity(Activity),
    Child(ChildRecord),
}

/// One transaction against a [`MemoryStore`]
#[derive(Debug)]
pub struct MemorySink {
    store: MemoryStore,
    pending: Vec<PendingWrite>,
    /// Open savepoints with the pending length at the time they were taken
    savepoints: Vec<(&'static str, usize)>,
}

impl MemorySink {
    fn savepoint_index(&self, name: &'static str) -> SinkResult<usize> {
        self.savepoints
            .iter()
            .rposition(|(open, _)| *open == name)
            .ok_or(SinkError::UnknownSavepoint(name))
    }

    fn pending_activity(&self, activity_id: i64) -> bool {
        self.pending
            .iter()
            .any(|w| matches!(w, PendingWrite::Activity(a) if a.activity_id == activity_id))
    }

    fn pending_child(&self, child: &ChildRecord) -> bool {
        self.pending.iter().any(
            |w| matches!(w, PendingWrite::Child(c) if c.kind == child.kind && c.id == child.id),
        )
    }

    /// Number of writes waiting for commit
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl ActivitySink for MemorySink {
    async fn savepoint(&mut self, name: &'static str) -> SinkResult<()> {
        self.savepoints.push((name, self.pending.len()));
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &'static str) -> SinkResult<()> {
        let index = self.savepoint_index(name)?;
        self.savepoints.truncate(index);
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &'static str) -> SinkResult<()> {
        let index = self.savepoint_index(name)?;
        let mark = self.savepoints[index].1;
        self.pending.truncate(mark);
        self.savepoints.truncate(index + 1);
        Ok(())
    }

    async fn upsert_activity(&mut self, activity: &Activity) -> SinkResult<bool> {
        let exists = self.store.lock()?.activities.contains_key(&activity.activity_id)
            || self.pending_activity(activity.activity_id);
        if exists {
            return Ok(false);
        }
        self.pending.push(PendingWrite::Activity(activity.clone()));
        Ok(true)
    }

    async fn upsert_child(&mut self, child: &ChildRecord) -> SinkResult<bool> {
        let exists = self.store.lock()?.has_child(child) || self.pending_child(child);
        if exists {
            return Ok(false);
        }
        self.pending.push(PendingWrite::Child(child.clone()));
        Ok(true)
    }

    async fn commit(&mut self) -> SinkResult<()> {
        let mut tables = self.store.lock()?;
        for write in self.pending.drain(..) {
            tables.apply(write);
        }
        self.savepoints.clear();
        Ok(())
    }

    async fn rollback(&mut self) -> SinkResult<()> {
        self.pending.clear();
        self.savepoints.clear();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::PayloadSummary;

    fn activity(id: i64, kind: &str) -> Activity {
        Activity {
            activity_id: id,
            activity_type: Some(kind.to_string()),
            description: None,
            date_activity: None,
            updated_at: None,
            destination_id: None,
            source_id: None,
            is_read: None,
            patient_id: None,
            is_finition: None,
            treatment_id: None,
            email_sent: None,
            dentist_first_name: None,
            dentist_last_name: None,
            dentist_email: None,
            dentist_type: None,
            commercial_en_charge: None,
            commercial_name: None,
            suivi_portefeuille: None,
            id_invoice_pennylane: None,
            invoice_amount: None,
            summary: PayloadSummary::default(),
        }
    }

    #[tokio::test]
    async fn test_writes_are_invisible_until_commit() {
        let store = MemoryStore::new();
        let mut sink = store.sink();

        assert!(sink.upsert_activity(&activity(1, "a")).await.unwrap());
        assert_eq!(store.activity_count().unwrap(), 0);

        sink.commit().await.unwrap();
        assert_eq!(store.activity_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_first_write_wins() {
        let store = MemoryStore::new();
        let mut sink = store.sink();

        assert!(sink.upsert_activity(&activity(1, "first")).await.unwrap());
        assert!(!sink.upsert_activity(&activity(1, "second")).await.unwrap());
        sink.commit().await.unwrap();
        assert!(!sink.upsert_activity(&activity(1, "third")).await.unwrap());
        sink.commit().await.unwrap();

        let stored = store.activity(1).unwrap().unwrap();
        assert_eq!(stored.activity_type.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_rollback_to_savepoint_discards_nested_writes() {
        let store = MemoryStore::new();
        let mut sink = store.sink();

        sink.savepoint("activity_row").await.unwrap();
        sink.upsert_activity(&activity(1, "kept")).await.unwrap();
        sink.savepoint("child_entity").await.unwrap();
        sink.upsert_child(&ChildRecord::new(EntityKind::Invoice, 5, 1))
            .await
            .unwrap();
        sink.rollback_to_savepoint("child_entity").await.unwrap();
        sink.release_savepoint("child_entity").await.unwrap();
        sink.release_savepoint("activity_row").await.unwrap();
        sink.commit().await.unwrap();

        assert!(store.activity(1).unwrap().is_some());
        assert_eq!(store.child_count(EntityKind::Invoice).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_savepoint_is_an_error() {
        let mut sink = MemoryStore::new().sink();
        let err = sink.release_savepoint("activity_row").await.unwrap_err();
        assert!(matches!(err, SinkError::UnknownSavepoint("activity_row")));
    }

    #[tokio::test]
    async fn test_rollback_discards_pending() {
        let store = MemoryStore::new();
        let mut sink = store.open().await.unwrap();
        sink.upsert_activity(&activity(2, "x")).await.unwrap();
        assert_eq!(sink.pending_len(), 1);
        sink.rollback().await.unwrap();
        sink.commit().await.unwrap();
        assert_eq!(store.activity_count().unwrap(), 0);
    }
}
