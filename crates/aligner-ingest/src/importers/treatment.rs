//! Treatment: a patient's aligner plan, or a refinement of an earlier one

use aligner_common::EntityKind;

use super::{ColumnSet, EntityImporter};
use crate::error::ChildImportError;
use crate::models::ChildRecord;
use crate::payload::Attrs;

const COLUMNS: ColumnSet = ColumnSet {
    // parent_treatment_id points back into this same table for refinements
    ints: &["patient", "dentist", "parent_treatment_id", "finition_index"],
    texts: &["state", "phase", "note_in_production"],
    decimals: &[],
    flags: &["is_finition"],
    timestamps: &["note_in_production_updated_at", "updated_at", "created_at"],
    documents: &[],
};

pub struct TreatmentImporter;

impl EntityImporter for TreatmentImporter {
    fn kind(&self) -> EntityKind {
        EntityKind::Treatment
    }

    fn build(&self, activity_id: i64, attrs: &Attrs<'_>) -> Result<ChildRecord, ChildImportError> {
        COLUMNS.build(self.kind(), activity_id, attrs)
    }
}
