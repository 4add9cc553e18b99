// ⚖️ Reconciliation Engine - new vs overlapping, decided against the live Index
//
// Decision rule, per transaction, in input order:
//   id ∈ Index  → overlapping, still appended (every occurrence is kept)
//   id ∉ Index  → new, appended, id enters the Index
//
// Check and insert for one transaction finish before the next is looked at,
// so duplicates inside a single file are caught against each other.

use crate::canonical::{Canonicalizer, FieldMapping};
use crate::error::{ExtractionError, Result};
use crate::extract::{ExtractedRow, ExtractorKind, RawRecord};
use crate::ledger::{Ledger, LedgerEntry, ReconciliationStatus, Transaction};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// ============================================================================
// FILE REPORT
// ============================================================================

/// One committed record: where it came from and how it was flagged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowOutcome {
    pub position: usize,
    pub transaction_id: String,
    pub status: ReconciliationStatus,
}

/// One skipped record and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub position: usize,
    pub line: Option<u64>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub source: String,
    pub extractor: Option<ExtractorKind>,
    pub committed: Vec<RowOutcome>,
    pub errors: Vec<RowError>,

    /// Whole-file problem (unsupported type, unreadable, archive failure)
    pub file_error: Option<String>,

    /// Set once the file has been moved out of the raw directory
    pub archived_to: Option<PathBuf>,
}

impl FileReport {
    pub fn new(path: &Path, source: &str) -> Self {
        FileReport {
            path: path.to_path_buf(),
            source: source.to_string(),
            extractor: None,
            committed: Vec::new(),
            errors: Vec::new(),
            file_error: None,
            archived_to: None,
        }
    }

    pub fn new_count(&self) -> usize {
        self.count_status(ReconciliationStatus::New)
    }

    pub fn overlapping_count(&self) -> usize {
        self.count_status(ReconciliationStatus::Overlapping)
    }

    pub fn rejected_count(&self) -> usize {
        self.errors.len()
    }

    fn count_status(&self, status: ReconciliationStatus) -> usize {
        self.committed.iter().filter(|o| o.status == status).count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} [{}]: {} new, {} overlapping, {} rejected",
            self.path.display(),
            self.source,
            self.new_count(),
            self.overlapping_count(),
            self.rejected_count()
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    canonicalizer: Canonicalizer,
}

impl ReconciliationEngine {
    pub fn new(canonicalizer: Canonicalizer) -> Self {
        ReconciliationEngine { canonicalizer }
    }

    /// Flag one transaction against the Index and append it
    ///
    /// A ledger I/O failure is returned as-is; the transaction is then not in
    /// the ledger and not in the Index.
    pub fn reconcile(&self, ledger: &mut Ledger, mut tx: Transaction) -> Result<LedgerEntry> {
        tx.reconciliation_status = if ledger.contains(&tx.transaction_id) {
            ReconciliationStatus::Overlapping
        } else {
            ReconciliationStatus::New
        };

        ledger.append(&tx)?;
        Ok(tx)
    }

    /// Reconcile a batch strictly in input order
    pub fn reconcile_batch(
        &self,
        ledger: &mut Ledger,
        transactions: impl IntoIterator<Item = Transaction>,
    ) -> Result<Vec<LedgerEntry>> {
        transactions
            .into_iter()
            .map(|tx| self.reconcile(ledger, tx))
            .collect()
    }

    /// Raw rows of one file → canonical → id → reconcile
    ///
    /// Row-level failures (extraction or canonicalization) are collected in
    /// the report and the next row proceeds. Only a ledger failure escapes.
    pub fn ingest_records(
        &self,
        ledger: &mut Ledger,
        file_path: &Path,
        source: &str,
        mapping: &FieldMapping,
        extractor: ExtractorKind,
        rows: Vec<ExtractedRow>,
    ) -> Result<FileReport> {
        let mut report = FileReport::new(file_path, source);
        report.extractor = Some(extractor);
        let ingested_at = Utc::now();

        for (idx, row) in rows.into_iter().enumerate() {
            let raw = match row {
                Ok(raw) => raw,
                Err(err) => {
                    let line = match &err {
                        ExtractionError::Row { line, .. } => Some(*line),
                        _ => None,
                    };
                    reject(&mut report, idx + 1, line, err.to_string());
                    continue;
                }
            };

            let mut tx = match self.candidate(&raw, mapping, source) {
                Ok(tx) => tx,
                Err(reason) => {
                    reject(&mut report, raw.position, Some(raw.line), reason);
                    continue;
                }
            };

            tx.set_provenance(&raw, file_path, extractor, ingested_at);

            let entry = self.reconcile(ledger, tx)?;
            debug!(
                file = %file_path.display(),
                position = raw.position,
                transaction_id = %entry.transaction_id,
                status = entry.reconciliation_status.as_str(),
                "record committed"
            );
            report.committed.push(RowOutcome {
                position: raw.position,
                transaction_id: entry.transaction_id,
                status: entry.reconciliation_status,
            });
        }

        Ok(report)
    }

    fn candidate(
        &self,
        raw: &RawRecord,
        mapping: &FieldMapping,
        source: &str,
    ) -> std::result::Result<Transaction, String> {
        self.canonicalizer
            .canonicalize(raw, mapping, source)
            .map(Transaction::from_canonical)
            .map_err(|e| e.to_string())
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new(Canonicalizer::new())
    }
}

fn reject(report: &mut FileReport, position: usize, line: Option<u64>, reason: String) {
    warn!(
        file = %report.path.display(),
        position,
        line = ?line,
        reason = %reason,
        "skipping record"
    );
    report.errors.push(RowError {
        position,
        line,
        reason,
    });
}

// ============================================================================
// TESTS
// ============================================================================
