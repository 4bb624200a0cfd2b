//! Error types for deltalens-core

use thiserror::Error;

/// Main error type for the deltalens-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Snapshot database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed or inconsistent query definition
    #[error("invalid query: {0}")]
    Query(String),

    /// Filter condition the evaluator does not know
    #[error("unknown filter operator: {0}")]
    UnknownOperator(String),

    /// Logical operator other than AND/OR in a filter chain
    #[error("unknown logical operation: {0}")]
    UnknownLogicalOp(String),

    /// Property entity other than user/event
    #[error("unknown property entity: {0}")]
    UnknownEntity(String),

    /// Channel filter object type that maps to no document level
    #[error("unknown filter object type: {0}")]
    UnknownObjectType(String),

    /// Metric not registered for a display category
    #[error("unknown metric {metric} for category {category}")]
    UnknownMetric { category: String, metric: String },

    /// Display category with no evaluator
    #[error("no properties to evaluate for category: {0}")]
    UnknownCategory(String),

    /// Arithmetic step of a metric recipe that is not supported
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// Snapshot lookup miss
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// Stored snapshot whose checksum does not match its body
    #[error("corrupt snapshot: {0}")]
    SnapshotCorrupt(String),

    /// Two snapshots that cannot be compared
    #[error("snapshot mismatch: {0}")]
    ShapeMismatch(String),
}

/// Result type alias for deltalens-core
pub type Result<T> = std::result::Result<T, Error>;
