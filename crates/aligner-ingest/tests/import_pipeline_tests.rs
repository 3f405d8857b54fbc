//! End-to-end import tests against the in-memory sink

mod common;

use aligner_common::EntityKind;
use aligner_ingest::error::SinkError;
use aligner_ingest::models::{Activity, ChildRecord, SqlValue};
use aligner_ingest::sink::{ActivitySink, MemorySink, MemoryStore};
use aligner_ingest::{BatchController, ImportConfig, ImportSummary, ParallelImporter};
use async_trait::async_trait;
use common::{payload, ExportBuilder};
use serde_json::json;
use std::path::Path;
use tokio_util::sync::CancellationToken;

fn config(path: &Path) -> ImportConfig {
    ImportConfig::default().with_source(path)
}

async fn import_sequential(path: &Path, store: &MemoryStore) -> ImportSummary {
    BatchController::new(config(path), store.sink())
        .run()
        .await
        .expect("sequential import")
}

fn mixed_export() -> ExportBuilder {
    ExportBuilder::new()
        .activity(
            1,
            "af_setup_created",
            &payload("AFSetup", json!({"id": 4812, "lab": 3, "price": "1299,00"})),
        )
        .activity(
            2,
            "treatment_started",
            &payload("Treatment", json!({"id": 702, "patient": 55, "is_finition": false})),
        )
        .activity(
            3,
            "invoice_sent",
            &payload("Invoice", json!({"id": 9001, "af_setup": 4812, "total_ttc": 1299.0})),
        )
        .activity(
            4,
            "retainer_ordered",
            &payload("Retainer", json!({"id": 31, "index": 1, "number_of_pair": 2})),
        )
        .activity(
            5,
            "prescription_submitted",
            &payload(
                "Prescription",
                json!({"id": 88, "treatment": 702, "clinic_objects": "{\"ipr\": [11, 21]}"}),
            ),
        )
        .activity(6, "note", "")
}

#[tokio::test]
async fn test_af_setup_row_creates_activity_and_child() {
    let file = ExportBuilder::new()
        .activity(
            101,
            "af_setup_validated",
            &payload("AFSetup", json!({"id": 4812, "state": "validated"})),
        )
        .write();
    let store = MemoryStore::new();

    let summary = import_sequential(file.path(), &store).await;

    assert_eq!(summary.imported, 1);
    assert_eq!(summary.children_inserted, 1);
    assert_eq!(store.activity_count().unwrap(), 1);
    assert_eq!(store.child_count(EntityKind::AfSetup).unwrap(), 1);

    let child = store.child(EntityKind::AfSetup, 4812).unwrap().unwrap();
    assert_eq!(child.activity_id, 101);

    let activity = store.activity(101).unwrap().unwrap();
    assert_eq!(activity.summary.object_name.as_deref(), Some("AFSetup"));
    assert_eq!(activity.summary.number_of_aligners, Some(14));
    assert_eq!(activity.summary.number_of_refinements, Some(1));
    assert_eq!(activity.summary.number_of_retainers, None);
    assert_eq!(activity.patient_id, Some(6977));
    assert_eq!(activity.treatment_id, Some(1204));
    assert_eq!(activity.email_sent, Some(true));
    assert_eq!(activity.suivi_portefeuille, None);
    assert_eq!(
        activity.date_activity.unwrap().to_string(),
        "2024-06-20 13:29:00"
    );
    assert_eq!(activity.invoice_amount.unwrap().to_string(), "1299.00");
}

#[tokio::test]
async fn test_every_variant_lands_in_its_table() {
    let file = mixed_export().write();
    let store = MemoryStore::new();

    let summary = import_sequential(file.path(), &store).await;

    assert_eq!(summary.rows_read, 6);
    assert_eq!(summary.imported, 6);
    assert_eq!(summary.children_inserted, 5);
    for kind in EntityKind::ALL {
        assert_eq!(store.child_count(kind).unwrap(), 1, "{kind}");
    }

    let prescription = store.child(EntityKind::Prescription, 88).unwrap().unwrap();
    assert_eq!(
        prescription.get("clinic_objects"),
        Some(&SqlValue::Json(Some(json!({"ipr": [11, 21]}))))
    );
}

#[tokio::test]
async fn test_malformed_payload_keeps_activity_with_null_summary() {
    let file = ExportBuilder::new()
        .activity(7, "af_setup_created", "{\"object_name\": \"AFSetup\", ")
        .write();
    let store = MemoryStore::new();

    let summary = import_sequential(file.path(), &store).await;

    assert_eq!(summary.imported, 1);
    assert_eq!(summary.errored, 0);
    assert_eq!(summary.malformed_payloads, 1);

    let activity = store.activity(7).unwrap().unwrap();
    assert_eq!(activity.summary.object_name, None);
    assert_eq!(activity.summary.number_of_aligners, None);
    assert_eq!(store.child_count(EntityKind::AfSetup).unwrap(), 0);
}

#[tokio::test]
async fn test_short_row_is_skipped_and_counted() {
    let file = ExportBuilder::new()
        .raw(&["8", "note", "too short"])
        .activity(9, "note", "")
        .write();
    let store = MemoryStore::new();

    let summary = import_sequential(file.path(), &store).await;

    assert_eq!(summary.rows_read, 2);
    assert_eq!(summary.errored, 1);
    assert_eq!(summary.imported, 1);
    assert!(store.activity(8).unwrap().is_none());
    assert!(store.activity(9).unwrap().is_some());
}

#[tokio::test]
async fn test_missing_activity_id_is_row_error() {
    let mut fields = common::activity_fields(0, "note", "");
    fields[0] = "n/a".to_string();
    let refs: Vec<&str> = fields.iter().map(String::as_str).collect();
    let file = ExportBuilder::new().raw(&refs).write();
    let store = MemoryStore::new();

    let summary = import_sequential(file.path(), &store).await;

    assert_eq!(summary.errored, 1);
    assert_eq!(store.activity_count().unwrap(), 0);
}

fn af_setups_of(store: &MemoryStore, activity_id: i64) -> Vec<i64> {
    store
        .snapshot()
        .unwrap()
        .children
        .get(&EntityKind::AfSetup)
        .map(|rows| {
            rows.values()
                .filter(|child| child.activity_id == activity_id)
                .map(|child| child.id)
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_duplicate_id_keeps_first_write() {
    let file = ExportBuilder::new()
        .activity(10, "first_type", &payload("AFSetup", json!({"id": 1})))
        .activity(10, "second_type", &payload("AFSetup", json!({"id": 2})))
        .write();
    let store = MemoryStore::new();

    let summary = import_sequential(file.path(), &store).await;

    assert_eq!(summary.imported, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.children_inserted, 1);
    assert_eq!(summary.children_failed, 0);
    let activity = store.activity(10).unwrap().unwrap();
    assert_eq!(activity.activity_type.as_deref(), Some("first_type"));
    assert_eq!(af_setups_of(&store, 10), vec![1]);
    assert_eq!(store.child_count(EntityKind::AfSetup).unwrap(), 1);

    let changed = ExportBuilder::new()
        .activity(10, "third_type", &payload("AFSetup", json!({"id": 3})))
        .write();
    let before = store.snapshot().unwrap();
    let again = import_sequential(changed.path(), &store).await;

    assert_eq!(again.imported, 0);
    assert_eq!(again.skipped, 1);
    assert_eq!(again.children_inserted, 0);
    assert_eq!(store.snapshot().unwrap(), before);
    assert_eq!(af_setups_of(&store, 10), vec![1]);
}

#[tokio::test]
async fn test_reimport_is_idempotent() {
    let file = mixed_export().write();
    let store = MemoryStore::new();

    import_sequential(file.path(), &store).await;
    let first = store.snapshot().unwrap();

    let second_run = import_sequential(file.path(), &store).await;
    assert_eq!(second_run.imported, 0);
    assert_eq!(second_run.skipped, 6);
    assert_eq!(store.snapshot().unwrap(), first);
}

#[tokio::test]
async fn test_unrecognized_discriminator_skips_child() {
    let file = ExportBuilder::new()
        .activity(11, "shipment", &payload("Shipment", json!({"id": 1})))
        .activity(12, "unknown", r#"{"data": {"id": 2}}"#)
        .write();
    let store = MemoryStore::new();

    let summary = import_sequential(file.path(), &store).await;

    assert_eq!(summary.imported, 2);
    assert_eq!(summary.unrecognized_payloads, 2);
    assert_eq!(summary.children_inserted, 0);
    let activity = store.activity(11).unwrap().unwrap();
    assert_eq!(activity.summary.object_name.as_deref(), Some("Shipment"));
}

#[tokio::test]
async fn test_child_fault_keeps_parent() {
    let file = ExportBuilder::new()
        .activity(
            13,
            "invoice_sent",
            &payload("Invoice", json!({"id": 5, "amount": {"value": 12}})),
        )
        .activity(14, "treatment_started", &payload("Treatment", json!({"state": "new"})))
        .write();
    let store = MemoryStore::new();

    let summary = import_sequential(file.path(), &store).await;

    assert_eq!(summary.imported, 2);
    assert_eq!(summary.errored, 0);
    assert_eq!(summary.children_failed, 2);
    assert!(store.activity(13).unwrap().is_some());
    assert!(store.activity(14).unwrap().is_some());
    assert_eq!(store.child_count(EntityKind::Invoice).unwrap(), 0);
    assert_eq!(store.child_count(EntityKind::Treatment).unwrap(), 0);
}

#[tokio::test]
async fn test_oversized_field_is_row_error() {
    let big = format!("{{\"object_name\": \"Note\", \"data\": \"{}\"}}", "x".repeat(4096));
    let file = ExportBuilder::new()
        .activity(15, "note", &big)
        .activity(16, "note", "")
        .write();
    let store = MemoryStore::new();

    let summary = BatchController::new(
        config(file.path()).with_field_size_limit(1024),
        store.sink(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(summary.errored, 1);
    assert!(store.activity(15).unwrap().is_none());
    assert!(store.activity(16).unwrap().is_some());
}

#[tokio::test]
async fn test_parallel_matches_sequential() {
    let mut builder = mixed_export();
    for id in 100..400 {
        let data = json!({"id": id * 10, "patient": id, "state": "active"});
        builder = builder.activity(id, "treatment_updated", &payload("Treatment", data));
    }
    let builder = builder.raw(&["bad", "row"]);
    let file = builder.write();

    let sequential = MemoryStore::new();
    let seq_summary = import_sequential(file.path(), &sequential).await;

    let parallel = MemoryStore::new();
    let par_summary = ParallelImporter::new(
        config(file.path()).with_workers(4).with_batch_size(25),
        parallel.clone(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(par_summary.rows_read, seq_summary.rows_read);
    assert_eq!(par_summary.imported, seq_summary.imported);
    assert_eq!(par_summary.errored, 1);
    assert_eq!(par_summary.children_inserted, seq_summary.children_inserted);
    assert_eq!(parallel.snapshot().unwrap(), sequential.snapshot().unwrap());
}

#[tokio::test]
async fn test_only_first_errors_are_reported() {
    let mut builder = ExportBuilder::new();
    for i in 0..15 {
        let id = i.to_string();
        builder = builder.raw(&[id.as_str(), "short"]);
    }
    let file = builder.activity(500, "note", "").write();
    let store = MemoryStore::new();

    let summary = import_sequential(file.path(), &store).await;

    assert_eq!(summary.errored, 15);
    assert_eq!(summary.errors_reported, 10);
    assert_eq!(summary.imported, 1);
}

/// Delegates to a memory sink and fires the token after `after` activity inserts
struct CancellingSink {
    inner: MemorySink,
    token: CancellationToken,
    after: usize,
    inserted: usize,
}

#[async_trait]
impl ActivitySink for CancellingSink {
    async fn savepoint(&mut self, name: &'static str) -> Result<(), SinkError> {
        self.inner.savepoint(name).await
    }

    async fn release_savepoint(&mut self, name: &'static str) -> Result<(), SinkError> {
        self.inner.release_savepoint(name).await
    }

    async fn rollback_to_savepoint(&mut self, name: &'static str) -> Result<(), SinkError> {
        self.inner.rollback_to_savepoint(name).await
    }

    async fn upsert_activity(&mut self, activity: &Activity) -> Result<bool, SinkError> {
        let inserted = self.inner.upsert_activity(activity).await?;
        self.inserted += 1;
        if self.inserted == self.after {
            self.token.cancel();
        }
        Ok(inserted)
    }

    async fn upsert_child(&mut self, child: &ChildRecord) -> Result<bool, SinkError> {
        self.inner.upsert_child(child).await
    }

    async fn commit(&mut self) -> Result<(), SinkError> {
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<(), SinkError> {
        self.inner.rollback().await
    }
}

#[tokio::test]
async fn test_cancellation_commits_completed_rows() {
    let mut builder = ExportBuilder::new();
    for id in 1..=20 {
        builder = builder.activity(id, "note", "");
    }
    let file = builder.write();
    let store = MemoryStore::new();
    let token = CancellationToken::new();
    let sink = CancellingSink {
        inner: store.sink(),
        token: token.clone(),
        after: 5,
        inserted: 0,
    };

    let summary = BatchController::new(config(file.path()), sink)
        .with_cancellation(token)
        .run()
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.rows_read, 5);
    assert_eq!(summary.imported, 5);
    assert_eq!(store.activity_count().unwrap(), 5);
}

#[tokio::test]
async fn test_parallel_cancelled_before_start_imports_nothing() {
    let file = mixed_export().write();
    let store = MemoryStore::new();
    let token = CancellationToken::new();
    token.cancel();

    let summary = ParallelImporter::new(config(file.path()).with_workers(2), store.clone())
        .with_cancellation(token)
        .run()
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(store.activity_count().unwrap(), 0);
}

#[tokio::test]
async fn test_missing_source_is_fatal() {
    let store = MemoryStore::new();
    let result = BatchController::new(config(Path::new("/nonexistent/export.csv")), store.sink())
        .run()
        .await;
    assert!(result.is_err());
}
