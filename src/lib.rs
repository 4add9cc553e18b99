// Unified Ledger - Core Library
// Statement files → canonical transactions → append-only JSONL ledger

pub mod error;
pub mod config;
pub mod extract;        // Raw records from CSV/TSV and statement text
pub mod canonical;      // Dates, amounts, currency → unified schema
pub mod identity;       // Content hash = transaction_id
pub mod ledger;         // JSONL store + replayed Index
pub mod reconcile;      // new vs overlapping
pub mod orchestrator;   // raw dir → ledger → processed dir

// Re-export commonly used types
pub use error::{CanonicalizationError, ExtractionError, IngestError, LedgerError};
pub use config::{IngestConfig, SourceRule};
pub use extract::{
    DelimitedExtractor, ExtractedRow, ExtractorKind, Extractors, PatternExtractor,
    RawRecord, RecordExtractor,
};
pub use canonical::{CanonicalFields, Canonicalizer, FieldMapping};
pub use identity::{content_hash, transaction_id};
pub use ledger::{
    Index, Ledger, LedgerEntry, LedgerStore, ReconciliationStatus, ReplayReport, Transaction,
};
pub use reconcile::{FileReport, ReconciliationEngine, RowError, RowOutcome};
pub use orchestrator::{Orchestrator, RunReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
