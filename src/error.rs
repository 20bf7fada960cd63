use thiserror::Error;

/// Main error type for the repair engine
#[derive(Error, Debug)]
pub enum RepairError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A statement failed in the backing store. Never retried locally.
    #[error("Database error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Failed to create salvage {kind} \"{name}\": {reason}")]
    SalvageCreation {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("Rule {rule} returned columns {found:?}, expected {expected:?}")]
    QueryShape {
        rule: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Row value error: column {column} {reason}")]
    RowValue { column: usize, reason: String },

    #[error("Invalid rule catalog: {0}")]
    Catalog(String),

    #[error("Invalid resume state: {0}")]
    InvalidState(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for repair operations
pub type Result<T> = std::result::Result<T, RepairError>;
