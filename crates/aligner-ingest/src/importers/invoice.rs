//! Invoice: billing for an AFSetup or a Retainer order
//!
//! Pricing is flattened per product line. The aligner line carries the discount
//! fields; the `kit_10`, `kit_16` and `dm` lines share one shape.

use aligner_common::EntityKind;

use super::{ColumnSet, EntityImporter};
use crate::error::ChildImportError;
use crate::models::ChildRecord;
use crate::payload::Attrs;

const COLUMNS: ColumnSet = ColumnSet {
    ints: &["af_setup", "retainer", "payment_terms_days"],
    texts: &[
        "type",
        "title",
        "source_name",
        "source_address",
        "destination_name",
        "destination_address",
        "description",
        "currency",
        "unit",
        "aligner_discount_type",
        "aligner_promo_code",
        "due_date_description",
        "status",
        "pdf_file",
        "pdf_image_file",
        "stripe_customer_id",
    ],
    decimals: &[
        "quantity",
        "unit_price",
        "tax",
        "amount",
        "aligner_org_price",
        "aligner_qta",
        "aligner_ttc",
        "aligner_pu_ht",
        "aligner_total_ht",
        "aligner_tva",
        "aligner_discount",
        "aligner_discount_rate",
        "aligner_prix_ht",
        "aligner_prix_ttc",
        "kit_10_qta",
        "kit_10_ttc",
        "kit_10_pu_ht",
        "kit_10_total_ht",
        "kit_10_tva",
        "kit_10_prix_ht",
        "kit_10_prix_ttc",
        "kit_16_qta",
        "kit_16_ttc",
        "kit_16_pu_ht",
        "kit_16_total_ht",
        "kit_16_tva",
        "kit_16_prix_ht",
        "kit_16_prix_ttc",
        "dm_qta",
        "dm_ttc",
        "dm_pu_ht",
        "dm_total_ht",
        "dm_tva",
        "dm_prix_ht",
        "dm_prix_ttc",
        "total_ht",
        "total_ttc",
        "total_discount",
    ],
    flags: &[],
    timestamps: &["due_date", "updated_at", "created_at"],
    documents: &[],
};

pub struct InvoiceImporter;

impl EntityImporter for InvoiceImporter {
    fn kind(&self) -> EntityKind {
        EntityKind::Invoice
    }

    fn build(&self, activity_id: i64, attrs: &Attrs<'_>) -> Result<ChildRecord, ChildImportError> {
        COLUMNS.build(self.kind(), activity_id, attrs)
    }
}
