// 🚨 Error Taxonomy
// One enum per failure class: row/file extraction, canonicalization, ledger I/O, run-level

use std::path::PathBuf;

use thiserror::Error;

// ============================================================================
// EXTRACTION (row or file level, isolated to the file)
// ============================================================================

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed header in {path}: {reason}")]
    Header { path: PathBuf, reason: String },
    #[error("malformed row at line {line}: {reason}")]
    Row { line: u64, reason: String },
    #[error("no extractor for {path}")]
    Unsupported { path: PathBuf },
}

// ============================================================================
// CANONICALIZATION (row level)
// ============================================================================

#[derive(Debug, Error, PartialEq)]
pub enum CanonicalizationError {
    #[error("missing field '{field}' (mapped from column '{column}')")]
    MissingField { field: &'static str, column: String },
    #[error("date format not recognized: '{0}'")]
    InvalidTimestamp(String),
    #[error("amount is not numeric: '{0}'")]
    InvalidAmount(String),
}

// ============================================================================
// LEDGER (fatal for the run)
// ============================================================================

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize ledger entry {transaction_id}: {source}")]
    Serialize {
        transaction_id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl LedgerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LedgerError::Io {
            path: path.into(),
            source,
        }
    }
}

// ============================================================================
// RUN LEVEL (orchestrator)
// ============================================================================

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("failed to list raw directory {path}: {source}")]
    RawDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, LedgerError>;
