// 🏗️ Extractor Framework
// Pluggable per-format adapters: source file → raw field maps

use crate::error::ExtractionError;
use csv::{ReaderBuilder, Trim};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::Path;

// ============================================================================
// CORE TYPES
// ============================================================================

/// ExtractorKind - Which adapter produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    /// CSV / TSV exports with a header row
    Delimited,
    /// Regex matches over statement text (text layer of a PDF)
    Pattern,
}

impl ExtractorKind {
    /// Short code, stored in entry metadata
    pub fn code(&self) -> &str {
        match self {
            ExtractorKind::Delimited => "delimited",
            ExtractorKind::Pattern => "pattern",
        }
    }
}

/// RawRecord - One row or one pattern match, before canonicalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// 1-based data row (delimited) or match number (pattern)
    pub position: usize,

    /// Physical line in the source file where the record starts
    pub line: u64,

    /// Source column / capture group → value
    pub fields: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn new(position: usize, line: u64) -> Self {
        RawRecord {
            position,
            line,
            fields: BTreeMap::new(),
        }
    }

    pub fn from_pairs<'a>(
        position: usize,
        line: u64,
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        RawRecord {
            position,
            line,
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Builder pattern: add one field
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// A record, or the reason this row could not be read
pub type ExtractedRow = Result<RawRecord, ExtractionError>;

// ============================================================================
// EXTRACTOR TRAIT
// ============================================================================

/// RecordExtractor - Core trait, one implementation per source format
///
/// `Err` means the whole file is unusable. Row-level problems come back as
/// `Err` elements inside the `Ok` vector so the remaining rows still flow.
pub trait RecordExtractor: Send + Sync {
    fn extract(&self, file_path: &Path) -> Result<Vec<ExtractedRow>, ExtractionError>;

    fn kind(&self) -> ExtractorKind;
}

// ============================================================================
// DELIMITED TEXT
// ============================================================================

pub struct DelimitedExtractor {
    delimiter: u8,
}

impl DelimitedExtractor {
    pub fn new(delimiter: u8) -> Self {
        DelimitedExtractor { delimiter }
    }

    pub fn csv() -> Self {
        Self::new(b',')
    }

    pub fn tsv() -> Self {
        Self::new(b'\t')
    }
}

impl RecordExtractor for DelimitedExtractor {
    fn extract(&self, file_path: &Path) -> Result<Vec<ExtractedRow>, ExtractionError> {
        let file = File::open(file_path).map_err(|source| ExtractionError::Read {
            path: file_path.to_path_buf(),
            source,
        })?;

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(self.delimiter)
            .trim(Trim::All)
            .from_reader(file);

        let headers = reader
            .headers()
            .map_err(|e| ExtractionError::Header {
                path: file_path.to_path_buf(),
                reason: e.to_string(),
            })?
            .clone();

        let mut rows = Vec::new();

        for (idx, result) in reader.records().enumerate() {
            // +2 because: 1-indexed + header row
            let fallback_line = idx as u64 + 2;

            match result {
                Ok(record) => {
                    let line = record.position().map(|p| p.line()).unwrap_or(fallback_line);
                    let mut raw = RawRecord::new(idx + 1, line);
                    for (name, value) in headers.iter().zip(record.iter()) {
                        raw.fields.insert(name.to_string(), value.to_string());
                    }
                    rows.push(Ok(raw));
                }
                Err(err) if err.is_io_error() => {
                    return Err(ExtractionError::Read {
                        path: file_path.to_path_buf(),
                        source: std::io::Error::other(err.to_string()),
                    });
                }
                Err(err) => {
                    let line = err.position().map(|p| p.line()).unwrap_or(fallback_line);
                    rows.push(Err(ExtractionError::Row {
                        line,
                        reason: err.to_string(),
                    }));
                }
            }
        }

        Ok(rows)
    }

    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Delimited
    }
}

// ============================================================================
// PATTERN MATCHING OVER STATEMENT TEXT
// ============================================================================

/// Default statement line: `01/31/2025  COFFEE SHOP  1,234.56`
///
/// Group names double as the record's field names, so the default field
/// mapping (`Date`, `Description`, `Amount`) covers both extractors.
pub const DEFAULT_STATEMENT_PATTERN: &str =
    r"(?P<Date>\d{2}/\d{2}/\d{4})\s+(?P<Description>.+?)\s+(?P<Amount>-?[\d,]+\.\d{2})";

pub struct PatternExtractor {
    patterns: Vec<Regex>,
}

impl PatternExtractor {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PatternExtractor { patterns })
    }

    /// Apply every pattern to already-extracted text
    ///
    /// Matches from all patterns are merged in document order and numbered
    /// from 1. A match overlapping an earlier kept match is dropped; on equal
    /// start the earlier-configured pattern wins.
    pub fn extract_text(&self, text: &str) -> Vec<RawRecord> {
        let mut found: Vec<(usize, usize, BTreeMap<String, String>)> = Vec::new();

        for pattern in &self.patterns {
            for caps in pattern.captures_iter(text) {
                let Some(whole) = caps.get(0) else { continue };
                let fields = pattern
                    .capture_names()
                    .flatten()
                    .filter_map(|name| {
                        caps.name(name)
                            .map(|m| (name.to_string(), m.as_str().trim().to_string()))
                    })
                    .collect();
                found.push((whole.start(), whole.end(), fields));
            }
        }

        // Stable: same start keeps pattern order
        found.sort_by_key(|(start, _, _)| *start);

        let mut records = Vec::with_capacity(found.len());
        let mut kept_end = 0;
        let mut scanned = 0;
        let mut line = 1u64;

        for (start, end, fields) in found {
            if !records.is_empty() && start < kept_end {
                continue;
            }
            line += text.as_bytes()[scanned..start]
                .iter()
                .filter(|b| **b == b'\n')
                .count() as u64;
            scanned = start;
            kept_end = end;

            records.push(RawRecord {
                position: records.len() + 1,
                line,
                fields,
            });
        }

        records
    }
}

impl RecordExtractor for PatternExtractor {
    fn extract(&self, file_path: &Path) -> Result<Vec<ExtractedRow>, ExtractionError> {
        let bytes = fs::read(file_path).map_err(|source| ExtractionError::Read {
            path: file_path.to_path_buf(),
            source,
        })?;
        let text = String::from_utf8_lossy(&bytes);

        Ok(self.extract_text(&text).into_iter().map(Ok).collect())
    }

    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Pattern
    }
}

// ============================================================================
// FACTORY
// ============================================================================

/// Extractors - One instance per supported file type, picked by extension
pub struct Extractors {
    csv: DelimitedExtractor,
    tsv: DelimitedExtractor,
    text: PatternExtractor,
}

impl Extractors {
    pub fn new(csv_delimiter: u8, patterns: &[String]) -> Result<Self, regex::Error> {
        Ok(Extractors {
            csv: DelimitedExtractor::new(csv_delimiter),
            tsv: DelimitedExtractor::tsv(),
            text: PatternExtractor::new(patterns)?,
        })
    }

    /// Select the extractor for a file; `None` = unsupported type
    pub fn for_path(&self, file_path: &Path) -> Option<&dyn RecordExtractor> {
        let ext = file_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())?;

        match ext.as_str() {
            "csv" => Some(&self.csv),
            "tsv" => Some(&self.tsv),
            "txt" => Some(&self.text),
            _ => None,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
