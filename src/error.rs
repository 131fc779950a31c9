use crate::validator::ValidationFailure;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KpiError {
    #[error("Missing required columns for {metric}: {}", .columns.join(", "))]
    MissingColumns { metric: String, columns: Vec<String> },

    #[error("Non-numeric input for {metric}: column(s) {} could not be coerced to numbers", .columns.join(", "))]
    NonNumericInput { metric: String, columns: Vec<String> },

    #[error("Missing input for {metric}: {input} is required")]
    MissingInput { metric: String, input: String },

    /// Raised when a metric's inputs break more than one kind of rule, or a
    /// rule other than missing/non-numeric. Carries every violation.
    #[error("Dataset validation failed for {metric}: {failure}")]
    Validation {
        metric: String,
        #[source]
        failure: ValidationFailure,
    },

    #[error("Duplicate column name (case-insensitive): {0}")]
    DuplicateColumn(String),

    #[error("Row {row} has {found} values but the dataset has {expected} columns")]
    RowLengthMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, KpiError>;
