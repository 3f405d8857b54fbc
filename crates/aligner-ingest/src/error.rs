//! Error types for the import pipeline
//!
//! Severity is encoded in the type:
//! - [`IngestError`] aborts the whole import
//! - [`RowError`] skips one source row
//! - [`ChildImportError`] skips one child entity; its activity row stays

use aligner_common::AlignerError;
use thiserror::Error;

/// Result type for fatal pipeline operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors raised by a relational sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown savepoint: {0}")]
    UnknownSavepoint(&'static str),
}

/// Fatal errors: nothing further can be imported
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Cannot open source '{path}': {source}")]
    SourceOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Source read error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Schema check failed, missing tables: {}", .0.join(", "))]
    SchemaMissing(Vec<String>),

    #[error(transparent)]
    Common(#[from] AlignerError),

    #[error("Import worker failed: {0}")]
    Worker(String),

    #[error("Import aborted at row {line}: {source}")]
    Aborted {
        line: u64,
        #[source]
        source: RowError,
    },
}

/// Where in the per-row state machine a row failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStage {
    Reading,
    Coercing,
    Loading,
}

impl std::fmt::Display for RowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowStage::Reading => write!(f, "reading"),
            RowStage::Coercing => write!(f, "coercing"),
            RowStage::Loading => write!(f, "loading"),
        }
    }
}

/// Row-fatal errors: the row is skipped and counted
#[derive(Debug, Error)]
pub enum RowError {
    #[error("undecodable record ({stage}): {message}")]
    Decode { stage: RowStage, message: String },

    #[error("field {index} is {size} bytes, over the {limit} byte limit")]
    FieldTooLarge { index: usize, size: usize, limit: usize },

    #[error("insufficient column count ({found}, need {required})")]
    TooFewFields { found: usize, required: usize },

    #[error("missing or non-numeric activity id '{raw}'")]
    MissingActivityId { raw: String },

    #[error("activity upsert failed: {0}")]
    Upsert(#[source] SinkError),

    /// Savepoint control failed; the transaction can no longer be trusted
    #[error("transaction control failed: {0}")]
    Transaction(#[source] SinkError),
}

impl RowError {
    pub fn stage(&self) -> RowStage {
        match self {
            RowError::Decode { stage, .. } => *stage,
            RowError::FieldTooLarge { .. } => RowStage::Reading,
            RowError::TooFewFields { .. } | RowError::MissingActivityId { .. } => {
                RowStage::Coercing
            },
            RowError::Upsert(_) | RowError::Transaction(_) => RowStage::Loading,
        }
    }

    /// Whether this error must stop the import rather than skip the row
    pub fn is_fatal(&self) -> bool {
        matches!(self, RowError::Transaction(_))
    }
}

/// Child-local errors: the child entity is skipped, the activity is kept
#[derive(Debug, Error)]
pub enum ChildImportError {
    #[error("payload has no usable 'id'")]
    MissingId,

    #[error("attribute '{field}' should be {expected}, got {found}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("child upsert failed: {0}")]
    Upsert(#[from] SinkError),
}
