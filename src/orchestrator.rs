// 📂 Ingestion Orchestrator - raw dir → core → ledger → processed dir
//
// Two-phase commit per file: every record is appended (and synced) first,
// the file is archived second. A crash in between leaves the file in the
// raw directory; the next run re-reads it and flags its records overlapping.

use crate::config::IngestConfig;
use crate::error::{ExtractionError, IngestError, LedgerError};
use crate::extract::Extractors;
use crate::ledger::Ledger;
use crate::reconcile::{FileReport, ReconciliationEngine};
use anyhow::Result as AnyResult;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub files: Vec<FileReport>,
}

impl RunReport {
    pub fn new_count(&self) -> usize {
        self.files.iter().map(FileReport::new_count).sum()
    }

    pub fn overlapping_count(&self) -> usize {
        self.files.iter().map(FileReport::overlapping_count).sum()
    }

    pub fn rejected_count(&self) -> usize {
        self.files.iter().map(FileReport::rejected_count).sum()
    }

    pub fn archived_count(&self) -> usize {
        self.files.iter().filter(|f| f.archived_to.is_some()).count()
    }

    pub fn failed_files(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| f.file_error.is_some())
    }

    pub fn summary(&self) -> String {
        format!(
            "{} files ({} archived, {} failed): {} new, {} overlapping, {} rejected",
            self.files.len(),
            self.archived_count(),
            self.failed_files().count(),
            self.new_count(),
            self.overlapping_count(),
            self.rejected_count()
        )
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct Orchestrator {
    config: IngestConfig,
    extractors: Extractors,
    engine: ReconciliationEngine,
}

impl Orchestrator {
    pub fn new(config: IngestConfig) -> AnyResult<Self> {
        let extractors = config.validated_extractors()?;
        let engine = ReconciliationEngine::new(config.canonicalizer());

        Ok(Orchestrator {
            config,
            extractors,
            engine,
        })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// One pass over the raw directory
    ///
    /// File-level problems are recorded and the next file is attempted. A
    /// ledger failure ends the run immediately.
    pub fn run(&self, ledger: &mut Ledger) -> Result<RunReport, IngestError> {
        let mut report = RunReport::default();

        for path in self.discover()? {
            let file_report = self.process_file(ledger, &path)?;
            info!("{}", file_report.summary());
            report.files.push(file_report);
        }

        info!("{}", report.summary());
        Ok(report)
    }

    /// Regular, non-hidden files of the raw directory in name order
    pub fn discover(&self) -> Result<Vec<PathBuf>, IngestError> {
        let raw_dir = &self.config.raw_dir;
        if !raw_dir.exists() {
            warn!(dir = %raw_dir.display(), "raw statements directory not found");
            return Ok(Vec::new());
        }

        let list_err = |source| IngestError::RawDir {
            path: raw_dir.clone(),
            source,
        };

        let mut files = Vec::new();
        for dir_entry in fs::read_dir(raw_dir).map_err(list_err)? {
            let dir_entry = dir_entry.map_err(list_err)?;
            let path = dir_entry.path();
            let hidden = dir_entry.file_name().to_string_lossy().starts_with('.');
            if path.is_file() && !hidden {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Extract, reconcile and archive one file
    pub fn process_file(&self, ledger: &mut Ledger, path: &Path) -> Result<FileReport, LedgerError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (source, mapping) = self.config.source_for(&filename);

        let Some(extractor) = self.extractors.for_path(path) else {
            let mut report = FileReport::new(path, source);
            let err = ExtractionError::Unsupported {
                path: path.to_path_buf(),
            };
            warn!(file = %path.display(), "unsupported file format, left in place");
            report.file_error = Some(err.to_string());
            return Ok(report);
        };

        let rows = match extractor.extract(path) {
            Ok(rows) => rows,
            Err(err) => {
                warn!(file = %path.display(), error = %err, "extraction failed, left in place");
                let mut report = FileReport::new(path, source);
                report.extractor = Some(extractor.kind());
                report.file_error = Some(err.to_string());
                return Ok(report);
            }
        };

        if rows.is_empty() {
            warn!(file = %path.display(), "no records found");
        }

        // Phase 1: durable append of every record
        let mut report =
            self.engine
                .ingest_records(ledger, path, source, mapping, extractor.kind(), rows)?;

        // Phase 2: archive
        match archive(path, &self.config.processed_dir) {
            Ok(dest) => report.archived_to = Some(dest),
            Err(err) => {
                warn!(file = %path.display(), error = %err, "archive failed, file stays in raw dir");
                report.file_error = Some(format!("archive failed: {}", err));
            }
        }

        Ok(report)
    }
}

/// Move a file into `dir`, never overwriting an earlier archive
fn archive(path: &Path, dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let dest = unique_destination(path, dir);

    if let Err(rename_err) = fs::rename(path, &dest) {
        // Different filesystem: copy, then drop the original
        fs::copy(path, &dest).map_err(|_| rename_err)?;
        fs::remove_file(path)?;
    }
    Ok(dest)
}

fn unique_destination(path: &Path, dir: &Path) -> PathBuf {
    let filename = path.file_name().unwrap_or_default();
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1..)
        .map(|n| dir.join(format!("{}-{}{}", stem, n, ext)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    struct Workspace {
        _dir: TempDir,
        config: IngestConfig,
    }

    impl Workspace {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let config = IngestConfig {
                ledger_path: dir.path().join("ledger").join("unified_ledger.jsonl"),
                raw_dir: dir.path().join("raw"),
                processed_dir: dir.path().join("processed"),
                ..IngestConfig::default()
            };
            fs::create_dir_all(&config.raw_dir).unwrap();
            Workspace { _dir: dir, config }
        }

        fn raw(&self, name: &str, content: &str) -> PathBuf {
            let path = self.config.raw_dir.join(name);
            fs::write(&path, content).unwrap();
            path
        }

        fn run(&self) -> RunReport {
            let mut ledger = Ledger::open(&self.config.ledger_path).unwrap();
            Orchestrator::new(self.config.clone())
                .unwrap()
                .run(&mut ledger)
                .unwrap()
        }

        fn ledger_lines(&self) -> Vec<serde_json::Value> {
            fs::read_to_string(&self.config.ledger_path)
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    const HEADER: &str = "Date,Account Number,Amount,Currency,Description\n";

    #[test]
    fn test_scenario_duplicate_row_csv() {
        let ws = Workspace::new();
        let raw = ws.raw(
            "test.csv",
            &format!(
                "{}2025-01-01,12345,100.00,USD,Test transaction\n\
                 2025-01-01,12345,100.00,USD,Test transaction\n",
                HEADER
            ),
        );

        let report = ws.run();

        assert!(!raw.exists(), "source file should be moved");
        assert!(ws.config.processed_dir.join("test.csv").exists());

        let lines = ws.ledger_lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["transaction_id"], lines[1]["transaction_id"]);
        assert_eq!(lines[0]["reconciliation_status"], "new");
        assert_eq!(lines[1]["reconciliation_status"], "overlapping");
        assert_eq!(lines[0]["source"], "LegalCodex");
        assert_eq!(lines[0]["timestamp"], "2025-01-01T00:00:00");
        assert_eq!(
            lines[0]["metadata"]["original_record"]["Description"],
            "Test transaction"
        );

        assert_eq!(report.new_count(), 1);
        assert_eq!(report.overlapping_count(), 1);
    }

    #[test]
    fn test_scenario_disjoint_files_across_runs() {
        let ws = Workspace::new();

        ws.raw(
            "jan.csv",
            &format!("{}2025-01-01,1,10.00,USD,a\n2025-01-02,1,20.00,USD,b\n", HEADER),
        );
        ws.run();
        let index1 = Ledger::open(&ws.config.ledger_path).unwrap().index().clone();

        ws.raw(
            "feb.csv",
            &format!(
                "{}2025-02-01,1,30.00,USD,c\n2025-02-02,1,40.00,USD,d\n2025-02-03,1,50.00,USD,e\n",
                HEADER
            ),
        );
        let report2 = ws.run();
        let index2 = Ledger::open(&ws.config.ledger_path).unwrap().index().clone();

        let new_ids: HashSet<String> = report2.files[0]
            .committed
            .iter()
            .map(|o| o.transaction_id.clone())
            .collect();

        let mut expected: HashSet<String> = index1.iter().map(str::to_string).collect();
        expected.extend(new_ids);
        let actual: HashSet<String> = index2.iter().map(str::to_string).collect();

        assert_eq!(actual, expected);
        assert_eq!(index2.len(), 5);
        assert_eq!(ws.ledger_lines().len(), 5);
    }

    #[test]
    fn test_reingest_in_later_run_is_overlapping() {
        let ws = Workspace::new();
        let body = format!("{}2025-01-01,12345,100.00,USD,Test transaction\n", HEADER);

        ws.raw("first.csv", &body);
        ws.run();
        ws.raw("again.csv", &body);
        let report = ws.run();

        assert_eq!(report.overlapping_count(), 1);
        let lines = ws.ledger_lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["reconciliation_status"], "overlapping");
    }

    #[test]
    fn test_earlier_lines_untouched_by_later_runs() {
        let ws = Workspace::new();
        ws.raw("a.csv", &format!("{}2025-01-01,1,1.00,USD,a\n", HEADER));
        ws.run();
        let before = fs::read_to_string(&ws.config.ledger_path).unwrap();

        ws.raw("b.csv", &format!("{}2025-01-02,1,2.00,USD,b\n", HEADER));
        ws.run();
        let after = fs::read_to_string(&ws.config.ledger_path).unwrap();

        assert!(after.starts_with(&before));
    }

    #[test]
    fn test_row_isolation_in_file() {
        let ws = Workspace::new();
        ws.raw(
            "mixed.csv",
            &format!(
                "{}2025-01-01,1,1.00,USD,a\n\
                 2025-01-02,1,2.00,USD,b\n\
                 2025-01-03,1,three,USD,c\n\
                 2025-01-04,1,4.00,USD,d\n\
                 2025-01-05,1,5.00,USD,e\n\
                 2025-01-06,1,6.00,USD,f\n",
                HEADER
            ),
        );

        let report = ws.run();
        assert_eq!(ws.ledger_lines().len(), 5);
        assert_eq!(report.rejected_count(), 1);
        assert_eq!(report.files[0].errors[0].position, 3);
        assert!(report.files[0].archived_to.is_some());
    }

    #[test]
    fn test_unsupported_file_stays_and_run_continues() {
        let ws = Workspace::new();
        let pdf = ws.raw("statement.pdf", "%PDF-1.4 binary");
        ws.raw("z.csv", &format!("{}2025-01-01,1,1.00,USD,a\n", HEADER));

        let report = ws.run();

        assert!(pdf.exists(), "unsupported file must not be archived");
        assert_eq!(report.files.len(), 2);
        assert_eq!(report.failed_files().count(), 1);
        assert_eq!(report.archived_count(), 1);
        assert_eq!(ws.ledger_lines().len(), 1);
    }

    #[test]
    fn test_statement_text_and_source_label() {
        let ws = Workspace::new();
        ws.raw(
            "cloud_statement.txt",
            "STATEMENT\n01/15/2025  GROCERY STORE  1,234.56\n01/16/2025  FUEL  45.00\n",
        );

        let report = ws.run();
        let lines = ws.ledger_lines();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["source"], "Comet");
        assert_eq!(lines[0]["amount"], 1234.56);
        assert_eq!(lines[0]["currency"], "USD");
        assert_eq!(lines[0]["timestamp"], "2025-01-15T00:00:00");
        assert_eq!(lines[0]["metadata"]["extractor"], "pattern");
        assert!(lines[0]["account_number"].is_null());
        assert_eq!(report.files[0].new_count(), 2);
    }

    #[test]
    fn test_empty_file_is_archived() {
        let ws = Workspace::new();
        ws.raw("empty.csv", HEADER);

        let report = ws.run();
        assert_eq!(report.archived_count(), 1);
        assert!(!ws.config.ledger_path.exists());
    }

    #[test]
    fn test_archive_never_overwrites() {
        let ws = Workspace::new();
        fs::create_dir_all(&ws.config.processed_dir).unwrap();
        fs::write(ws.config.processed_dir.join("a.csv"), "older").unwrap();

        ws.raw("a.csv", &format!("{}2025-01-01,1,1.00,USD,a\n", HEADER));
        let report = ws.run();

        assert_eq!(
            report.files[0].archived_to,
            Some(ws.config.processed_dir.join("a-1.csv"))
        );
        assert_eq!(
            fs::read_to_string(ws.config.processed_dir.join("a.csv")).unwrap(),
            "older"
        );
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let ws = Workspace::new();

        let no_formats = IngestConfig {
            date_formats: Vec::new(),
            ..ws.config.clone()
        };
        assert!(Orchestrator::new(no_formats).is_err());

        let bad_pattern = IngestConfig {
            statement_patterns: vec!["(unclosed".to_string()],
            ..ws.config.clone()
        };
        assert!(Orchestrator::new(bad_pattern).is_err());

        assert!(Orchestrator::new(ws.config.clone()).is_ok());
    }

    #[test]
    fn test_missing_raw_dir_is_empty_run() {
        let ws = Workspace::new();
        fs::remove_dir(&ws.config.raw_dir).unwrap();

        let report = ws.run();
        assert!(report.files.is_empty());
    }

    #[test]
    fn test_ledger_failure_stops_run_and_keeps_file() {
        let ws = Workspace::new();
        let raw = ws.raw("a.csv", &format!("{}2025-01-01,1,1.00,USD,a\n", HEADER));
        let later = ws.raw("b.csv", &format!("{}2025-01-02,1,2.00,USD,b\n", HEADER));

        let mut ledger = Ledger::open(&ws.config.ledger_path).unwrap();
        // A directory now sits where the ledger file goes: every append fails
        fs::create_dir_all(&ws.config.ledger_path).unwrap();

        let err = Orchestrator::new(ws.config.clone())
            .unwrap()
            .run(&mut ledger)
            .unwrap_err();

        assert!(matches!(err, IngestError::Ledger(LedgerError::Io { .. })));
        assert!(raw.exists(), "file must stay for the next run");
        assert!(later.exists(), "run stops at the first ledger failure");
        assert!(ledger.index().is_empty());
    }
}
