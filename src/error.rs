use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the import engine.
///
/// Record-level problems (undecodable fields, unresolved references) are not
/// represented here: they are logged and counted by the pass that hit them.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("legacy file not found: {}", .0.to_string_lossy())]
    FileNotFound(PathBuf),
    #[error("no mapping configured for entity kind '{0}'")]
    UnknownEntityKind(String),
    #[error("failed to decode {}: {reason}", .path.to_string_lossy())]
    Decode { path: PathBuf, reason: String },
    #[error("failed to write cost item '{name}': {source}")]
    DictionaryWrite {
        name: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to truncate table '{table}': {source}")]
    Truncate {
        table: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("invalid SQL identifier '{0}'")]
    InvalidIdentifier(String),
    #[error("setting {parent_id} as parent of {child_id} would create a cycle")]
    CircularReference { child_id: i64, parent_id: i64 },
    #[error("work {0} not found")]
    WorkNotFound(i64),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ImportError>;
