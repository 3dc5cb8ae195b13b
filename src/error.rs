//! Error types for the cellcurate engine
//!
//! This module provides structured error definitions using thiserror. Binaries
//! and command handlers propagate these through anyhow at the outer boundary.

use thiserror::Error;

/// Rejections raised while validating caller input
///
/// Filter clauses that fail validation are reported and then treated as
/// unconstrained; mutations that fail validation never touch the store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Attribute name not present in the attribute registry
    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    /// Free-text clause that looks like a comparison but cannot be parsed
    #[error("Malformed clause: {0}")]
    MalformedClause(String),

    /// Comparison against an attribute that carries no numeric value
    #[error("Attribute is not numeric: {0}")]
    NotNumeric(String),

    /// Value kind does not match the field (e.g. a tag set written to `label`)
    #[error("Value for {field} must be {expected}")]
    ValueKindMismatch {
        field: &'static str,
        expected: &'static str,
    },

    /// Every cell carries exactly one non-empty cell type
    #[error("Cell type cannot be empty")]
    EmptyCellType,

    /// Connection replacement referencing a cell outside the scoped session
    #[error("Edge ({pre}, {post}) has an endpoint outside batch {batch}")]
    EdgeOutsideScope { pre: usize, post: usize, batch: u32 },
}

/// Main error type for cellcurate operations
#[derive(Error, Debug)]
pub enum CellCurateError {
    /// Caller input failed validation
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Cell index outside 1..=count
    #[error("Cell index {index} out of range (dataset has {count} cells)")]
    CellOutOfRange { index: usize, count: usize },

    /// Session reference not part of the loaded dataset
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// Dataset input refers to a unit the session does not contain
    #[error("Unit {uid} not found in session {session}")]
    UnknownUnit { session: String, uid: u32 },

    /// Dataset input lists the same unit twice in one session
    #[error("Duplicate unit {uid} in session {session}")]
    DuplicateUnit { session: String, uid: u32 },

    /// Backup revision not found for a session
    #[error("Backup {backup} not found for session {session}")]
    BackupNotFound { session: String, backup: String },

    /// Persistence gateway failed for one session
    #[error("Persistence error for session {session}: {message}")]
    Persistence { session: String, message: String },

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// TOML parse error
    #[error("Failed to parse config: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for cellcurate operations
pub type Result<T> = std::result::Result<T, CellCurateError>;

/// Convert anyhow::Error to CellCurateError
impl From<anyhow::Error> for CellCurateError {
    fn from(err: anyhow::Error) -> Self {
        CellCurateError::Other(err.to_string())
    }
}

impl CellCurateError {
    /// Wrap any displayable failure as a per-session persistence error
    pub fn persistence(session: impl Into<String>, err: impl std::fmt::Display) -> Self {
        CellCurateError::Persistence {
            session: session.into(),
            message: err.to_string(),
        }
    }
}
