//! Row models written by the import pipeline

use aligner_common::EntityKind;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

/// Parent row of the `activities` table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Activity {
    pub activity_id: i64,
    pub activity_type: Option<String>,
    pub description: Option<String>,
    pub date_activity: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
    pub destination_id: Option<i64>,
    pub source_id: Option<i64>,
    pub is_read: Option<bool>,
    pub patient_id: Option<i64>,
    pub is_finition: Option<bool>,
    pub treatment_id: Option<i64>,
    pub email_sent: Option<bool>,
    pub dentist_first_name: Option<String>,
    pub dentist_last_name: Option<String>,
    pub dentist_email: Option<String>,
    pub dentist_type: Option<String>,
    pub commercial_en_charge: Option<String>,
    pub commercial_name: Option<String>,
    pub suivi_portefeuille: Option<String>,
    pub id_invoice_pennylane: Option<String>,
    pub invoice_amount: Option<BigDecimal>,
    pub summary: PayloadSummary,
}

/// Denormalized copy of the embedded payload header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PayloadSummary {
    pub object_name: Option<String>,
    pub number_of_aligners: Option<i64>,
    pub number_of_refinements: Option<i64>,
    pub number_of_retainers: Option<i64>,
}

/// A typed, nullable column value of a child row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Int(Option<i64>),
    Text(Option<String>),
    Bool(Option<bool>),
    Decimal(Option<BigDecimal>),
    Timestamp(Option<DateTime<Utc>>),
    Json(Option<serde_json::Value>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        match self {
            SqlValue::Int(v) => v.is_none(),
            SqlValue::Text(v) => v.is_none(),
            SqlValue::Bool(v) => v.is_none(),
            SqlValue::Decimal(v) => v.is_none(),
            SqlValue::Timestamp(v) => v.is_none(),
            SqlValue::Json(v) => v.is_none(),
        }
    }
}

/// One row destined for a child table, keyed by its own id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChildRecord {
    pub kind: EntityKind,
    pub id: i64,
    pub activity_id: i64,
    /// Variant columns in insert order, excluding `id` and `activity_id`
    pub columns: Vec<(&'static str, SqlValue)>,
}

impl ChildRecord {
    pub fn new(kind: EntityKind, id: i64, activity_id: i64) -> Self {
        Self {
            kind,
            id,
            activity_id,
            columns: Vec::new(),
        }
    }

    pub fn push(&mut self, column: &'static str, value: SqlValue) {
        self.columns.push((column, value));
    }

    pub fn table(&self) -> &'static str {
        self.kind.table_name()
    }

    /// Value of a variant column, if the importer set it
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_child_record_lookup() {
        let mut record = ChildRecord::new(EntityKind::Retainer, 12, 99);
        record.push("state", SqlValue::Text(Some("shipped".into())));
        record.push("price", SqlValue::Decimal(None));

        assert_eq!(record.table(), "retainers");
        assert_eq!(record.get("state"), Some(&SqlValue::Text(Some("shipped".into()))));
        assert!(record.get("price").unwrap().is_null());
        assert!(record.get("index").is_none());
    }
}
