//! Error taxonomy for pool operations

use crate::object::ContentHash;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors that can occur while canonicalizing, storing, resolving or syncing
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Malformed unit, malformed hash, out-of-range language code
    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Unsupported or corrupt record, broken Merkle reconstruction
    #[error("Schema error: {0}")]
    Schema(String),

    /// A hash re-entered its own active traversal stack
    #[error("Dependency cycle: {}", format_cycle(.0))]
    Cycle(Vec<ContentHash>),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PoolError {
    /// Shorthand for a validation failure on a named field
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        PoolError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

fn format_cycle(path: &[ContentHash]) -> String {
    path.iter()
        .map(|h| h.to_hex())
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl From<rusqlite::Error> for PoolError {
    fn from(e: rusqlite::Error) -> Self {
        PoolError::Database(format!("SQLite: {}", e))
    }
}

impl From<sled::Error> for PoolError {
    fn from(e: sled::Error) -> Self {
        PoolError::Database(format!("sled: {}", e))
    }
}
