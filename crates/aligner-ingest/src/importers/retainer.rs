//! Retainer: post-treatment retention order

use aligner_common::EntityKind;

use super::{ColumnSet, EntityImporter};
use crate::error::ChildImportError;
use crate::models::ChildRecord;
use crate::payload::Attrs;

const COLUMNS: ColumnSet = ColumnSet {
    ints: &[
        "patient",
        "treatment",
        "index",
        "dentist_id",
        "dentist_profile_id",
        "number_of_pair",
        "kit_balance_10",
        "kit_balance_16",
    ],
    texts: &[
        "state",
        "impression_type",
        "impression_sub_type",
        "shipping_number",
        "shipping_state",
        "arcades_to_deal",
        "order_status",
        "backup_state",
    ],
    decimals: &["price"],
    flags: &["is_checked_by_lab"],
    timestamps: &["pick_date", "updated_at", "created_at"],
    documents: &[],
};

pub struct RetainerImporter;

impl EntityImporter for RetainerImporter {
    fn kind(&self) -> EntityKind {
        EntityKind::Retainer
    }

    fn build(&self, activity_id: i64, attrs: &Attrs<'_>) -> Result<ChildRecord, ChildImportError> {
        COLUMNS.build(self.kind(), activity_id, attrs)
    }
}
