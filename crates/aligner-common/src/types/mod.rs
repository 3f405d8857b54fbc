//! Shared domain types
//!
//! The embedded payload of an activity row names the kind of downstream object it
//! describes. The set of kinds this workspace knows how to decompose is closed and
//! lives here so the importer and the read side agree on table names.

use serde::{Deserialize, Serialize};

/// Names of every table populated by the import pipeline, parent first.
pub const ALL_TABLES: [&str; 6] = [
    "activities",
    "af_setups",
    "treatments",
    "invoices",
    "retainers",
    "prescriptions",
];

/// A known child entity variant of an activity payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    AfSetup,
    Treatment,
    Invoice,
    Retainer,
    Prescription,
}

impl EntityKind {
    /// Every known kind, in declaration order
    pub const ALL: [EntityKind; 5] = [
        EntityKind::AfSetup,
        EntityKind::Treatment,
        EntityKind::Invoice,
        EntityKind::Retainer,
        EntityKind::Prescription,
    ];

    /// Resolve the payload discriminator (`object_name`).
    ///
    /// Matching is exact: the export writes these tokens verbatim, and anything else
    /// is a payload kind this version does not decompose.
    pub fn from_object_name(name: &str) -> Option<Self> {
        match name {
            "AFSetup" => Some(EntityKind::AfSetup),
            "Treatment" => Some(EntityKind::Treatment),
            "Invoice" => Some(EntityKind::Invoice),
            "Retainer" => Some(EntityKind::Retainer),
            "Prescription" => Some(EntityKind::Prescription),
            _ => None,
        }
    }

    /// Discriminator token as written in the payload
    pub fn object_name(self) -> &'static str {
        match self {
            EntityKind::AfSetup => "AFSetup",
            EntityKind::Treatment => "Treatment",
            EntityKind::Invoice => "Invoice",
            EntityKind::Retainer => "Retainer",
            EntityKind::Prescription => "Prescription",
        }
    }

    /// Child table holding this kind
    pub fn table_name(self) -> &'static str {
        match self {
            EntityKind::AfSetup => "af_setups",
            EntityKind::Treatment => "treatments",
            EntityKind::Invoice => "invoices",
            EntityKind::Retainer => "retainers",
            EntityKind::Prescription => "prescriptions",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.object_name())
    }
}
