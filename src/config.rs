// ⚙️ Ingestion Config - Paths, field mappings and source rules as data
// Loaded from JSON; every field has a default so partial files are fine

use crate::canonical::{Canonicalizer, FieldMapping, DEFAULT_CURRENCY, DEFAULT_DATE_FORMATS};
use crate::extract::{Extractors, DEFAULT_STATEMENT_PATTERN};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// SOURCE RULES
// ============================================================================

/// Labels files whose name contains `filename_contains` (case-insensitive)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRule {
    pub label: String,
    pub filename_contains: String,

    /// Overrides `default_mapping` for this source
    #[serde(default)]
    pub mapping: Option<FieldMapping>,
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub ledger_path: PathBuf,
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,

    /// Tried in order, first match wins
    pub date_formats: Vec<String>,
    pub default_currency: String,

    pub csv_delimiter: char,
    pub statement_patterns: Vec<String>,

    /// Rules are checked in order; no match → `default_source`
    pub sources: Vec<SourceRule>,
    pub default_source: String,
    pub default_mapping: FieldMapping,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            ledger_path: PathBuf::from("financial_discovery/ledger/unified_ledger.jsonl"),
            raw_dir: PathBuf::from("financial_discovery/statements/raw"),
            processed_dir: PathBuf::from("financial_discovery/statements/processed"),
            date_formats: DEFAULT_DATE_FORMATS.iter().map(|f| f.to_string()).collect(),
            default_currency: DEFAULT_CURRENCY.to_string(),
            csv_delimiter: ',',
            statement_patterns: vec![DEFAULT_STATEMENT_PATTERN.to_string()],
            sources: vec![SourceRule {
                label: "Comet".to_string(),
                filename_contains: "cloud".to_string(),
                mapping: None,
            }],
            default_source: "LegalCodex".to_string(),
            default_mapping: FieldMapping::default(),
        }
    }
}

impl IngestConfig {
    /// Load config from a JSON file and validate it
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: IngestConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        config.validate()?;
        Ok(config)
    }

    /// Catch bad settings before any file is touched
    pub fn validate(&self) -> Result<()> {
        self.validated_extractors().map(|_| ())
    }

    /// Validate and hand back the extractors built along the way
    pub fn validated_extractors(&self) -> Result<Extractors> {
        if self.date_formats.is_empty() {
            bail!("date_formats must list at least one format");
        }
        if self.default_currency.trim().is_empty() {
            bail!("default_currency must not be empty");
        }
        self.extractors()
    }

    pub fn csv_delimiter_byte(&self) -> Result<u8> {
        if !self.csv_delimiter.is_ascii() {
            bail!("csv_delimiter must be a single ASCII character, got {:?}", self.csv_delimiter);
        }
        Ok(self.csv_delimiter as u8)
    }

    /// Source label and field mapping for a raw file name
    pub fn source_for(&self, filename: &str) -> (&str, &FieldMapping) {
        let filename_lower = filename.to_lowercase();

        self.sources
            .iter()
            .find(|rule| filename_lower.contains(&rule.filename_contains.to_lowercase()))
            .map(|rule| {
                (
                    rule.label.as_str(),
                    rule.mapping.as_ref().unwrap_or(&self.default_mapping),
                )
            })
            .unwrap_or((self.default_source.as_str(), &self.default_mapping))
    }

    pub fn canonicalizer(&self) -> Canonicalizer {
        Canonicalizer::with_formats(
            self.date_formats.clone(),
            self.default_currency.trim().to_uppercase(),
        )
    }

    pub fn extractors(&self) -> Result<Extractors> {
        Extractors::new(self.csv_delimiter_byte()?, &self.statement_patterns)
            .context("Invalid statement pattern")
    }
}

// ============================================================================
// TESTS
// ============================================================================
