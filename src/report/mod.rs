//! Machine-readable run reports.
//!
//! A report is written after every completed detect or fix run. The
//! checksum covers the serialized report with the checksum field blanked, so
//! a reader can re-derive it.

use chrono::Local;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{RepairError, Result};
use crate::types::{Completion, ScanMode};

/// Report metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Report generation timestamp
    pub timestamp: String,
    /// Tool name and version
    pub tool_name: String,
    pub version: String,
    /// Database the run scanned
    pub database_path: String,
    /// Fingerprint of the rule catalog used
    pub catalog_fingerprint: String,
    /// Invocations the run took
    pub invocations: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairReport {
    pub metadata: ReportMetadata,
    pub mode: ScanMode,
    pub to_fix: Vec<String>,
    pub fixed: Vec<String>,
    pub unresolved: Vec<String>,
    pub diagnostics: Vec<String>,
    pub report_checksum: String,
}

impl RepairReport {
    pub fn from_completion(metadata: ReportMetadata, completion: &Completion) -> Result<Self> {
        let mut report = match completion {
            Completion::Detect {
                to_fix,
                diagnostics,
            } => Self {
                metadata,
                mode: ScanMode::Detect,
                to_fix: to_fix.clone(),
                fixed: Vec::new(),
                unresolved: Vec::new(),
                diagnostics: diagnostics.clone(),
                report_checksum: String::new(),
            },
            Completion::Fix { fixed, unresolved } => Self {
                metadata,
                mode: ScanMode::Fix,
                to_fix: Vec::new(),
                fixed: fixed.clone(),
                unresolved: unresolved.clone(),
                diagnostics: Vec::new(),
                report_checksum: String::new(),
            },
        };
        report.report_checksum = report.calculate_checksum()?;
        Ok(report)
    }

    /// SHA-256 over the report serialized with an empty checksum
    pub fn calculate_checksum(&self) -> Result<String> {
        let mut unsigned = self.clone();
        unsigned.report_checksum.clear();
        let data = serde_json::to_vec(&unsigned).map_err(|err| RepairError::Parse(err.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(&data);
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub fn verify_checksum(&self) -> Result<bool> {
        Ok(self.calculate_checksum()? == self.report_checksum)
    }
}

/// Writes reports into `<output_dir>/reports`
pub struct ReportWriter {
    reports_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(output_dir: &Path) -> Result<Self> {
        let reports_dir = output_dir.join("reports");
        fs::create_dir_all(&reports_dir)?;
        Ok(Self { reports_dir })
    }

    /// Write `report` as pretty JSON; returns the file path
    pub fn write(&self, report: &RepairReport) -> Result<PathBuf> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = self
            .reports_dir
            .join(format!("repair_{}_{timestamp}.json", report.mode));
        let content = serde_json::to_string_pretty(report)
            .map_err(|err| RepairError::Parse(err.to_string()))?;
        fs::write(&path, content)?;
        tracing::info!(path = %path.display(), "report written");
        Ok(path)
    }
}

pub fn create_report_metadata(
    database_path: &Path,
    catalog_fingerprint: &str,
    invocations: u32,
) -> ReportMetadata {
    ReportMetadata {
        timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        tool_name: "forum-repair".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database_path: database_path.display().to_string(),
        catalog_fingerprint: catalog_fingerprint.to_string(),
        invocations,
    }
}

pub fn load_report(path: &Path) -> Result<RepairReport> {
    let data = fs::read(path)?;
    serde_json::from_slice(&data).map_err(|err| RepairError::Parse(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> ReportMetadata {
        create_report_metadata(Path::new("forum.db"), "abc", 3)
    }

    #[test]
    fn test_checksum_detects_tampering() {
        let completion = Completion::Detect {
            to_fix: vec!["missing_posters".to_string()],
            diagnostics: vec!["Message #3 was posted by member #9, who is now missing.".to_string()],
        };
        let mut report = RepairReport::from_completion(metadata(), &completion).unwrap();
        assert_eq!(report.report_checksum.len(), 64);
        assert!(report.verify_checksum().unwrap());

        report.to_fix.push("stats_topics".to_string());
        assert!(!report.verify_checksum().unwrap());
    }

    #[test]
    fn test_write_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path()).unwrap();
        let completion = Completion::Fix {
            fixed: vec!["missing_posters".to_string()],
            unresolved: Vec::new(),
        };
        let report = RepairReport::from_completion(metadata(), &completion).unwrap();

        let path = writer.write(&report).unwrap();
        assert!(path.starts_with(dir.path().join("reports")));
        let loaded = load_report(&path).unwrap();
        assert_eq!(loaded, report);
        assert!(loaded.verify_checksum().unwrap());
    }
}
