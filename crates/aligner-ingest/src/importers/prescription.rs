//! Prescription: the dentist's treatment request and clinic preferences

use aligner_common::EntityKind;

use super::{ColumnSet, EntityImporter};
use crate::error::ChildImportError;
use crate::models::ChildRecord;
use crate::payload::Attrs;

const COLUMNS: ColumnSet = ColumnSet {
    ints: &["treatment", "package"],
    texts: &[
        "package_type",
        "rejection_reason",
        "pdf_file",
        "pdf_image_file",
        "pdf_file_clinic_preference",
        "pdf_image_file_clinic_preference",
        "lang_file",
        "phase",
        "sub_phase",
    ],
    decimals: &[],
    flags: &[],
    timestamps: &["updated_at", "created_at"],
    // Stored as JSONB; unparseable text is kept as a JSON string
    documents: &["clinic_objects", "clinical_preference"],
};

pub struct PrescriptionImporter;

impl EntityImporter for PrescriptionImporter {
    fn kind(&self) -> EntityKind {
        EntityKind::Prescription
    }

    fn build(&self, activity_id: i64, attrs: &Attrs<'_>) -> Result<ChildRecord, ChildImportError> {
        COLUMNS.build(self.kind(), activity_id, attrs)
    }
}
