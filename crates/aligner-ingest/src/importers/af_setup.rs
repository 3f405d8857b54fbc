//! AFSetup: the aligner fabrication setup reviewed by lab and dentist

use aligner_common::EntityKind;

use super::{ColumnSet, EntityImporter};
use crate::error::ChildImportError;
use crate::models::ChildRecord;
use crate::payload::Attrs;

const COLUMNS: ColumnSet = ColumnSet {
    ints: &["lab", "treatment"],
    texts: &[
        "name",
        "state",
        "reason",
        "lab_instruct",
        "af_view",
        "pdf_file",
        "pdf_image_file",
        "payment_status",
        "shipping_number",
        "shipping_state",
    ],
    decimals: &["price", "discount_amount"],
    flags: &[
        "paid",
        "is_checked_by_lab",
        "is_checked_by_dentist",
        "is_price_changed",
    ],
    timestamps: &["pick_date", "af_setup_date", "updated_at", "created_at"],
    documents: &[],
};

pub struct AfSetupImporter;

impl EntityImporter for AfSetupImporter {
    fn kind(&self) -> EntityKind {
        EntityKind::AfSetup
    }

    fn build(&self, activity_id: i64, attrs: &Attrs<'_>) -> Result<ChildRecord, ChildImportError> {
        COLUMNS.build(self.kind(), activity_id, attrs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::SqlValue;
    use serde_json::json;

    #[test]
    fn test_build_af_setup() {
        let data = json!({
            "id": 4812,
            "lab": 3,
            "treatment": "9,001",
            "state": "validated_by_dentist",
            "price": "1299,00",
            "discount_amount": 50,
            "paid": true,
            "is_checked_by_lab": "True",
            "pick_date": "2024-06-20T09:15:00Z",
            "unrelated": "ignored"
        });
        let record = AfSetupImporter
            .build(100, &Attrs::new(data.as_object().unwrap()))
            .unwrap();

        assert_eq!(record.id, 4812);
        assert_eq!(record.activity_id, 100);
        assert_eq!(record.get("treatment"), Some(&SqlValue::Int(Some(9001))));
        assert_eq!(
            record.get("state"),
            Some(&SqlValue::Text(Some("validated_by_dentist".into())))
        );
        match record.get("price") {
            Some(SqlValue::Decimal(Some(price))) => assert_eq!(price.to_string(), "1299.00"),
            other => panic!("unexpected price {other:?}"),
        }
        assert_eq!(record.get("is_checked_by_lab"), Some(&SqlValue::Bool(Some(true))));
        assert_eq!(record.get("is_checked_by_dentist"), Some(&SqlValue::Bool(None)));
        assert!(!record.get("pick_date").unwrap().is_null());
        assert!(record.get("unrelated").is_none());
    }
}
