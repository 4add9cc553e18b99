// 📒 Ledger Store - Append-only JSONL log + in-memory Index
// One entry per line, never rewritten. The Index is a cache rebuilt by replay.

use crate::canonical::CanonicalFields;
use crate::error::{LedgerError, Result};
use crate::extract::{ExtractorKind, RawRecord};
use crate::identity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::Utf8Error;
use tracing::{debug, info, warn};

/// Metadata key holding the untouched source record
pub const ORIGINAL_RECORD_KEY: &str = "original_record";

// ============================================================================
// TRANSACTION / LEDGER ENTRY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconciliationStatus {
    /// Id was not in the Index at append time
    New,
    /// Id was already known; the entry is still written
    Overlapping,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ReconciliationStatus::New => "new",
            ReconciliationStatus::Overlapping => "overlapping",
        }
    }
}

/// Transaction in the unified schema
///
/// Field order here is the on-disk order of every ledger line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub timestamp: String,
    pub description: String,
    pub amount: f64,
    pub currency: String,
    pub source: String,
    pub account_number: Option<String>,
    pub reconciliation_status: ReconciliationStatus,

    /// Opaque audit data; never part of the id
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A Transaction once it has been written
pub type LedgerEntry = Transaction;

impl Transaction {
    /// Assign the content-derived id to canonical fields
    ///
    /// Status starts as `New`; the reconciliation engine sets the real value
    /// right before the append.
    pub fn from_canonical(fields: CanonicalFields) -> Self {
        let transaction_id = identity::transaction_id(&fields);
        Transaction {
            transaction_id,
            timestamp: fields.timestamp,
            description: fields.description,
            amount: fields.amount,
            currency: fields.currency,
            source: fields.source,
            account_number: fields.account_number,
            reconciliation_status: ReconciliationStatus::New,
            metadata: Map::new(),
        }
    }

    /// The hashed part of this transaction
    pub fn canonical_fields(&self) -> CanonicalFields {
        CanonicalFields {
            timestamp: self.timestamp.clone(),
            description: self.description.clone(),
            amount: self.amount,
            currency: self.currency.clone(),
            source: self.source.clone(),
            account_number: self.account_number.clone(),
        }
    }

    /// Recompute the id from the stored fields (audit check)
    pub fn verify_id(&self) -> bool {
        identity::transaction_id(&self.canonical_fields()) == self.transaction_id
    }

    /// Record where this transaction came from
    pub fn set_provenance(
        &mut self,
        raw: &RawRecord,
        source_file: &Path,
        extractor: ExtractorKind,
        ingested_at: DateTime<Utc>,
    ) {
        self.metadata.insert(
            ORIGINAL_RECORD_KEY.to_string(),
            serde_json::json!(raw.fields),
        );
        self.metadata.insert(
            "source_file".to_string(),
            serde_json::json!(source_file.display().to_string()),
        );
        self.metadata
            .insert("position".to_string(), serde_json::json!(raw.position));
        self.metadata
            .insert("extractor".to_string(), serde_json::json!(extractor.code()));
        self.metadata.insert(
            "ingested_at".to_string(),
            serde_json::json!(ingested_at.to_rfc3339()),
        );
    }

    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}

// ============================================================================
// INDEX
// ============================================================================

/// Every transaction_id present in the ledger
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    ids: HashSet<String>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, transaction_id: &str) -> bool {
        self.ids.contains(transaction_id)
    }

    /// Returns false if the id was already present
    pub fn insert(&mut self, transaction_id: impl Into<String>) -> bool {
        self.ids.insert(transaction_id.into())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn is_superset(&self, other: &Index) -> bool {
        self.ids.is_superset(&other.ids)
    }
}

impl FromIterator<String> for Index {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        Index {
            ids: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// REPLAY DIAGNOSTICS
// ============================================================================

/// A ledger line that could not be replayed; left in the file as-is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptLine {
    /// 1-based physical line number
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Lines that produced an id (duplicates included)
    pub entries: usize,
    pub skipped: Vec<CorruptLine>,
}

/// Minimal view of a line: replay only needs the id
#[derive(Deserialize)]
struct IndexLine {
    transaction_id: String,
}

// ============================================================================
// LEDGER STORE
// ============================================================================

pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LedgerStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replay every line and collect the ids
    ///
    /// A missing file is an empty ledger. Lines that are not valid UTF-8 or
    /// not a JSON object with a string `transaction_id` are skipped and
    /// reported; they are never removed.
    pub fn load_index(&self) -> Result<(Index, ReplayReport)> {
        let mut index = Index::new();
        let mut report = ReplayReport::default();

        self.for_each_line(|line_no, line| {
            let parsed = line.map_err(|e| e.to_string()).and_then(|line| {
                serde_json::from_str::<IndexLine>(line).map_err(|e| e.to_string())
            });
            match parsed {
                Ok(parsed) if !parsed.transaction_id.is_empty() => {
                    index.insert(parsed.transaction_id);
                    report.entries += 1;
                }
                Ok(_) => skip(&mut report, &self.path, line_no, "empty transaction_id".to_string()),
                Err(reason) => skip(&mut report, &self.path, line_no, reason),
            }
        })?;

        Ok((index, report))
    }

    /// Full entries in ledger order (unparseable lines skipped)
    pub fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let mut entries = Vec::new();
        let mut report = ReplayReport::default();

        self.for_each_line(|line_no, line| {
            let parsed = line.map_err(|e| e.to_string()).and_then(|line| {
                serde_json::from_str::<LedgerEntry>(line).map_err(|e| e.to_string())
            });
            match parsed {
                Ok(entry) => entries.push(entry),
                Err(reason) => skip(&mut report, &self.path, line_no, reason),
            }
        })?;

        Ok(entries)
    }

    /// Write one entry as one complete line, synced before returning
    ///
    /// The ledger directory is created on demand. If the file ends in an
    /// unterminated fragment (an earlier crash or a failed partial write), a
    /// newline goes first so the fragment stays isolated on its own line. The
    /// tail is checked on every append, not once per store.
    pub fn append(&mut self, entry: &LedgerEntry) -> Result<()> {
        let mut line =
            serde_json::to_string(entry).map_err(|source| LedgerError::Serialize {
                transaction_id: entry.transaction_id.clone(),
                source,
            })?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| LedgerError::io(parent, e))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| LedgerError::io(&self.path, e))?;

        if has_torn_tail(&mut file).map_err(|e| LedgerError::io(&self.path, e))? {
            warn!(path = %self.path.display(), "ledger ends in a partial line; starting a new line");
            line.insert(0, '\n');
        }

        // Single write of the whole line, then flush + fsync
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .and_then(|_| file.sync_data())
            .map_err(|e| LedgerError::io(&self.path, e))?;

        debug!(
            transaction_id = %entry.transaction_id,
            status = entry.reconciliation_status.as_str(),
            "appended ledger entry"
        );
        Ok(())
    }

    /// Visit every non-blank line; lines that are not UTF-8 arrive as `Err`
    fn for_each_line(
        &self,
        mut visit: impl FnMut(usize, std::result::Result<&str, Utf8Error>),
    ) -> Result<()> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(LedgerError::io(&self.path, e)),
        };

        for (idx, bytes) in BufReader::new(file).split(b'\n').enumerate() {
            let bytes = bytes.map_err(|e| LedgerError::io(&self.path, e))?;
            let line_no = idx + 1;

            match std::str::from_utf8(&bytes) {
                Ok(line) => {
                    let line = line.trim_end_matches('\r');
                    if line.trim().is_empty() {
                        continue;
                    }
                    visit(line_no, Ok(line));
                }
                Err(e) => visit(line_no, Err(e)),
            }
        }

        Ok(())
    }
}

fn skip(report: &mut ReplayReport, path: &Path, line: usize, reason: String) {
    warn!(path = %path.display(), line, reason = %reason, "skipping unparseable ledger line");
    report.skipped.push(CorruptLine { line, reason });
}

fn has_torn_tail(file: &mut File) -> std::io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

// ============================================================================
// LEDGER (store + live index)
// ============================================================================

/// The ledger file together with the Index replayed from it
///
/// `append` is the only mutation. The id goes into the Index only once the
/// line is on disk, so the Index never knows an id the file lacks.
pub struct Ledger {
    store: LedgerStore,
    index: Index,
    replay: ReplayReport,
}

impl Ledger {
    /// Open (or start) a ledger and rebuild its Index by replay
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = LedgerStore::new(path);
        let (index, replay) = store.load_index()?;

        info!(
            path = %store.path().display(),
            entries = replay.entries,
            known_ids = index.len(),
            skipped = replay.skipped.len(),
            "ledger index rebuilt"
        );

        Ok(Ledger {
            store,
            index,
            replay,
        })
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn contains(&self, transaction_id: &str) -> bool {
        self.index.contains(transaction_id)
    }

    pub fn replay_report(&self) -> &ReplayReport {
        &self.replay
    }

    pub fn append(&mut self, entry: &LedgerEntry) -> Result<()> {
        self.store.append(entry)?;
        self.index.insert(entry.transaction_id.clone());
        Ok(())
    }

    pub fn entries(&self) -> Result<Vec<LedgerEntry>> {
        self.store.entries()
    }
}

// ============================================================================
// TESTS
// ============================================================================
