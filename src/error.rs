//src/error.rs

use std::path::PathBuf;

use crate::types::TaxId;

#[derive(Debug, thiserror::Error)]
pub enum LpiError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unable to find database file: {}", .0.display())]
    DatabaseNotFound(PathBuf),

    /// The parent chain of `start` revisits `repeated`.
    #[error("corrupt taxonomy: lineage of {start} loops back to {repeated}")]
    CorruptTaxonomy { start: TaxId, repeated: TaxId },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, LpiError>;
