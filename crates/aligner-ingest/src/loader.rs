//! Activity loader
//!
//! Turns one raw row into an activity insert plus, for recognized payloads, one child
//! insert. The activity runs in savepoint `activity_row`; the child runs nested in
//! `child_entity` so a child fault never takes the activity with it. A row whose
//! activity id is already stored is a no-op: its payload is not decomposed either.

use tracing::{debug, warn};

use crate::coerce::{parse_boolean, parse_date, parse_decimal, parse_integer, parse_text};
use crate::error::{ChildImportError, RowError, RowStage};
use crate::importers::importer_for;
use crate::models::Activity;
use crate::payload::{self, Attrs, ObjectKind, Payload};
use crate::reader::RawRow;
use crate::sink::ActivitySink;
use aligner_common::EntityKind;

/// Minimum number of positional fields in a usable row
pub const MIN_FIELDS: usize = 22;

/// Column index of the embedded payload
const PAYLOAD_FIELD: usize = 8;

const ACTIVITY_SAVEPOINT: &str = "activity_row";
const CHILD_SAVEPOINT: &str = "child_entity";

/// What happened to the embedded payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadStatus {
    Empty,
    Malformed,
    Unrecognized(String),
    /// Recognized variant; `data` may still have been unusable
    Entity(EntityKind),
}

/// What happened to the child entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildOutcome {
    NotApplicable,
    Inserted(EntityKind),
    /// The child id was already stored
    AlreadyPresent(EntityKind),
    /// The child was skipped; the activity was kept
    Failed(EntityKind),
    /// The activity id was already stored, so its payload was not decomposed again
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    pub activity_id: i64,
    /// False when the activity id already existed
    pub inserted: bool,
    pub payload: PayloadStatus,
    pub child: ChildOutcome,
}

/// Coerce the positional fields of a row into an [`Activity`]
pub fn build_activity(row: &RawRow, payload: &Payload) -> Result<Activity, RowError> {
    if row.len() < MIN_FIELDS {
        return Err(RowError::TooFewFields {
            found: row.len(),
            required: MIN_FIELDS,
        });
    }

    let activity_id = parse_integer(row.field(0)).ok_or_else(|| RowError::MissingActivityId {
        raw: row.field(0).to_string(),
    })?;

    Ok(Activity {
        activity_id,
        activity_type: parse_text(row.field(1)),
        description: parse_text(row.field(2)),
        date_activity: parse_date(row.field(3)),
        updated_at: parse_date(row.field(4)),
        destination_id: parse_integer(row.field(5)),
        source_id: parse_integer(row.field(6)),
        is_read: parse_boolean(row.field(7)),
        patient_id: parse_integer(row.field(9)),
        is_finition: parse_boolean(row.field(10)),
        treatment_id: parse_integer(row.field(11)),
        email_sent: parse_boolean(row.field(12)),
        dentist_first_name: parse_text(row.field(13)),
        dentist_last_name: parse_text(row.field(14)),
        dentist_email: parse_text(row.field(15)),
        dentist_type: parse_text(row.field(16)),
        commercial_en_charge: parse_text(row.field(17)),
        commercial_name: parse_text(row.field(18)),
        suivi_portefeuille: parse_text(row.field(19)),
        id_invoice_pennylane: parse_text(row.field(20)),
        invoice_amount: parse_decimal(row.field(21)),
        summary: payload.summary(),
    })
}

/// Load one row into the sink's open transaction.
///
/// A returned error means nothing of the row was kept. Check
/// [`RowError::is_fatal`] before carrying on with the next row.
pub async fn load_row<S>(sink: &mut S, row: &RawRow) -> Result<LoadOutcome, RowError>
where
    S: ActivitySink + ?Sized,
{
    let payload = payload::decode(row.field(PAYLOAD_FIELD));
    let activity = build_activity(row, &payload)?;
    let activity_id = activity.activity_id;

    sink.savepoint(ACTIVITY_SAVEPOINT)
        .await
        .map_err(RowError::Transaction)?;

    let inserted = match sink.upsert_activity(&activity).await {
        Ok(inserted) => inserted,
        Err(e) => {
            sink.rollback_to_savepoint(ACTIVITY_SAVEPOINT)
                .await
                .map_err(RowError::Transaction)?;
            sink.release_savepoint(ACTIVITY_SAVEPOINT)
                .await
                .map_err(RowError::Transaction)?;
            return Err(RowError::Upsert(e));
        },
    };

    let (status, child) = match payload {
        Payload::None => (PayloadStatus::Empty, ChildOutcome::NotApplicable),
        Payload::Malformed(reason) => {
            warn!(activity_id, line = row.line, reason = %reason, "Malformed payload, skipping child");
            (PayloadStatus::Malformed, ChildOutcome::NotApplicable)
        },
        Payload::Decoded(decoded) => match decoded.kind {
            ObjectKind::Unrecognized(name) => {
                (PayloadStatus::Unrecognized(name), ChildOutcome::NotApplicable)
            },
            ObjectKind::Known(kind) if !inserted => {
                debug!(activity_id, kind = %kind, "Activity already stored, child not imported");
                (PayloadStatus::Entity(kind), ChildOutcome::Skipped)
            },
            ObjectKind::Known(kind) => match &decoded.data {
                Some(data) => {
                    let outcome = load_child(sink, activity_id, kind, &Attrs::new(data)).await?;
                    (PayloadStatus::Entity(kind), outcome)
                },
                None => {
                    warn!(activity_id, kind = %kind, "Payload has no data object, skipping child");
                    (PayloadStatus::Entity(kind), ChildOutcome::Failed(kind))
                },
            },
        },
    };

    sink.release_savepoint(ACTIVITY_SAVEPOINT)
        .await
        .map_err(RowError::Transaction)?;

    Ok(LoadOutcome {
        activity_id,
        inserted,
        payload: status,
        child,
    })
}

async fn load_child<S>(
    sink: &mut S,
    activity_id: i64,
    kind: EntityKind,
    attrs: &Attrs<'_>,
) -> Result<ChildOutcome, RowError>
where
    S: ActivitySink + ?Sized,
{
    let record = match importer_for(kind).build(activity_id, attrs) {
        Ok(record) => record,
        Err(e) => {
            log_child_failure(activity_id, kind, attrs, &e);
            return Ok(ChildOutcome::Failed(kind));
        },
    };

    sink.savepoint(CHILD_SAVEPOINT)
        .await
        .map_err(RowError::Transaction)?;

    let outcome = match sink.upsert_child(&record).await {
        Ok(true) => ChildOutcome::Inserted(kind),
        Ok(false) => ChildOutcome::AlreadyPresent(kind),
        Err(e) => {
            sink.rollback_to_savepoint(CHILD_SAVEPOINT)
                .await
                .map_err(RowError::Transaction)?;
            log_child_failure(activity_id, kind, attrs, &ChildImportError::Upsert(e));
            ChildOutcome::Failed(kind)
        },
    };

    sink.release_savepoint(CHILD_SAVEPOINT)
        .await
        .map_err(RowError::Transaction)?;

    Ok(outcome)
}

fn log_child_failure(activity_id: i64, kind: EntityKind, attrs: &Attrs<'_>, error: &ChildImportError) {
    // The raw id, even when it is the reason for the failure
    let child_id = attrs.text("id").unwrap_or_default();
    warn!(
        activity_id,
        kind = %kind,
        child_id = %child_id,
        stage = %RowStage::Loading,
        error = %error,
        "Child entity import failed, activity kept"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::sink::MemoryStore;

    fn row(id: &str, payload: &str) -> RawRow {
        let mut fields = vec![String::new(); MIN_FIELDS];
        fields[0] = id.to_string();
        fields[1] = "af_setup_validated".to_string();
        fields[3] = "juin 20, 2024, 1:29 PM".to_string();
        fields[7] = "True".to_string();
        fields[8] = payload.to_string();
        fields[9] = "6,977".to_string();
        fields[21] = "12,50".to_string();
        RawRow::from_fields(1, fields)
    }

    #[test]
    fn test_build_activity_coerces_fields() {
        let raw = row("101", "");
        let activity = build_activity(&raw, &Payload::None).unwrap();
        assert_eq!(activity.activity_id, 101);
        assert_eq!(activity.activity_type.as_deref(), Some("af_setup_validated"));
        assert_eq!(activity.description, None);
        assert_eq!(
            activity.date_activity.unwrap().to_string(),
            "2024-06-20 13:29:00"
        );
        assert_eq!(activity.is_read, Some(true));
        assert_eq!(activity.email_sent, None);
        assert_eq!(activity.patient_id, Some(6977));
        assert_eq!(activity.invoice_amount.unwrap().to_string(), "12.50");
    }

    #[test]
    fn test_build_activity_rejects_bad_rows() {
        let short = RawRow::from_fields(1, ["1", "a", "b"]);
        assert!(matches!(
            build_activity(&short, &Payload::None),
            Err(RowError::TooFewFields { found: 3, required: 22 })
        ));

        let no_id = row("", "");
        assert!(matches!(
            build_activity(&no_id, &Payload::None),
            Err(RowError::MissingActivityId { .. })
        ));
    }

    #[tokio::test]
    async fn test_load_row_with_child() {
        let store = MemoryStore::new();
        let mut sink = store.sink();
        let raw = row(
            "101",
            r#"{"object_name":"AFSetup","number_of_aligners":14,"data":{"id":4812,"state":"new"}}"#,
        );

        let outcome = load_row(&mut sink, &raw).await.unwrap();
        sink.commit().await.unwrap();

        assert!(outcome.inserted);
        assert_eq!(outcome.payload, PayloadStatus::Entity(EntityKind::AfSetup));
        assert_eq!(outcome.child, ChildOutcome::Inserted(EntityKind::AfSetup));

        let activity = store.activity(101).unwrap().unwrap();
        assert_eq!(activity.summary.number_of_aligners, Some(14));
        let child = store.child(EntityKind::AfSetup, 4812).unwrap().unwrap();
        assert_eq!(child.activity_id, 101);
    }

    #[tokio::test]
    async fn test_child_failure_keeps_activity() {
        let store = MemoryStore::new();
        let mut sink = store.sink();
        let raw = row(
            "102",
            r#"{"object_name":"Invoice","data":{"id":7,"amount":{"bad":true}}}"#,
        );

        let outcome = load_row(&mut sink, &raw).await.unwrap();
        sink.commit().await.unwrap();

        assert!(outcome.inserted);
        assert_eq!(outcome.child, ChildOutcome::Failed(EntityKind::Invoice));
        assert!(store.activity(102).unwrap().is_some());
        assert_eq!(store.child_count(EntityKind::Invoice).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_data_object_fails_child_only() {
        let store = MemoryStore::new();
        let mut sink = store.sink();
        let raw = row("103", r#"{"object_name":"Retainer","number_of_retainers":"2"}"#);

        let outcome = load_row(&mut sink, &raw).await.unwrap();
        assert_eq!(outcome.child, ChildOutcome::Failed(EntityKind::Retainer));
        assert_eq!(sink.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_activity_does_not_import_child() {
        let store = MemoryStore::new();
        let mut sink = store.sink();

        load_row(
            &mut sink,
            &row("10", r#"{"object_name":"AFSetup","data":{"id":1}}"#),
        )
        .await
        .unwrap();
        let second = load_row(
            &mut sink,
            &row("10", r#"{"object_name":"AFSetup","data":{"id":2}}"#),
        )
        .await
        .unwrap();
        sink.commit().await.unwrap();

        assert!(!second.inserted);
        assert_eq!(second.payload, PayloadStatus::Entity(EntityKind::AfSetup));
        assert_eq!(second.child, ChildOutcome::Skipped);
        assert!(store.child(EntityKind::AfSetup, 1).unwrap().is_some());
        assert!(store.child(EntityKind::AfSetup, 2).unwrap().is_none());
        assert_eq!(store.child_count(EntityKind::AfSetup).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_child_is_already_present() {
        let store = MemoryStore::new();
        let mut sink = store.sink();
        let payload = r#"{"object_name":"Treatment","data":{"id":55}}"#;

        load_row(&mut sink, &row("1", payload)).await.unwrap();
        let second = load_row(&mut sink, &row("2", payload)).await.unwrap();

        assert!(second.inserted);
        assert_eq!(second.child, ChildOutcome::AlreadyPresent(EntityKind::Treatment));
    }
}
