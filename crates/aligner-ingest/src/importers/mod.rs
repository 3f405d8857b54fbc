//! Entity importers, one per payload variant
//!
//! Each importer maps the variant's `data` attributes 1:1 onto its child table
//! columns. Attributes missing from the payload become NULL; attributes of the wrong
//! JSON type fail the child only.

mod af_setup;
mod invoice;
mod prescription;
mod retainer;
mod treatment;

pub use af_setup::AfSetupImporter;
pub use invoice::InvoiceImporter;
pub use prescription::PrescriptionImporter;
pub use retainer::RetainerImporter;
pub use treatment::TreatmentImporter;

use aligner_common::EntityKind;

use crate::error::ChildImportError;
use crate::models::{ChildRecord, SqlValue};
use crate::payload::Attrs;

/// Builds the child row for one payload variant
pub trait EntityImporter: Send + Sync {
    fn kind(&self) -> EntityKind;

    /// Map the variant attributes onto a child row owned by `activity_id`
    fn build(&self, activity_id: i64, attrs: &Attrs<'_>) -> Result<ChildRecord, ChildImportError>;
}

/// Importer for a resolved discriminator
pub fn importer_for(kind: EntityKind) -> &'static dyn EntityImporter {
    match kind {
        EntityKind::AfSetup => &AfSetupImporter,
        EntityKind::Treatment => &TreatmentImporter,
        EntityKind::Invoice => &InvoiceImporter,
        EntityKind::Retainer => &RetainerImporter,
        EntityKind::Prescription => &PrescriptionImporter,
    }
}

/// Typed column groups of a child table, excluding `id` and `activity_id`
#[derive(Debug)]
pub(crate) struct ColumnSet {
    pub ints: &'static [&'static str],
    pub texts: &'static [&'static str],
    pub decimals: &'static [&'static str],
    pub flags: &'static [&'static str],
    pub timestamps: &'static [&'static str],
    pub documents: &'static [&'static str],
}

impl ColumnSet {
    /// Build a child row, reading each column from the attribute of the same name
    pub fn build(
        &self,
        kind: EntityKind,
        activity_id: i64,
        attrs: &Attrs<'_>,
    ) -> Result<ChildRecord, ChildImportError> {
        let mut record = ChildRecord::new(kind, attrs.id()?, activity_id);

        for &column in self.ints {
            record.push(column, SqlValue::Int(attrs.int(column)?));
        }
        for &column in self.texts {
            record.push(column, SqlValue::Text(attrs.text(column)));
        }
        for &column in self.decimals {
            record.push(column, SqlValue::Decimal(attrs.decimal(column)?));
        }
        for &column in self.flags {
            record.push(column, SqlValue::Bool(attrs.flag(column)?));
        }
        for &column in self.timestamps {
            record.push(column, SqlValue::Timestamp(attrs.timestamp(column)));
        }
        for &column in self.documents {
            record.push(column, SqlValue::Json(attrs.document(column)));
        }

        Ok(record)
    }
}
