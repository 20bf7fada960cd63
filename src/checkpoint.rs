use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::catalog::Catalog;
use crate::error::{RepairError, Result};
use crate::types::{RunState, ScanMode};

pub const CHECKPOINT_VERSION: u32 = 1;

/// Persisted run state of one paused (or finished detect) run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub run_key: String,
    pub mode: ScanMode,
    pub catalog_fingerprint: String,
    pub state: RunState,
}

impl Checkpoint {
    pub fn new(
        run_key: impl Into<String>,
        mode: ScanMode,
        catalog_fingerprint: impl Into<String>,
        state: RunState,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            created_at: Utc::now(),
            run_key: run_key.into(),
            mode,
            catalog_fingerprint: catalog_fingerprint.into(),
            state,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResumeValidation {
    pub is_valid: bool,
    pub reason: Option<String>,
}

impl ResumeValidation {
    fn valid() -> Self {
        Self {
            is_valid: true,
            reason: None,
        }
    }

    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason.into()),
        }
    }

    pub fn into_result(self) -> Result<()> {
        match self.reason {
            Some(reason) if !self.is_valid => Err(RepairError::InvalidState(reason)),
            _ => Ok(()),
        }
    }
}

/// Check that `checkpoint` can resume a `mode` run over `catalog`
pub fn validate_resume(checkpoint: &Checkpoint, catalog: &Catalog, mode: ScanMode) -> ResumeValidation {
    if checkpoint.version != CHECKPOINT_VERSION {
        return ResumeValidation::invalid(format!(
            "checkpoint version {} (expected {CHECKPOINT_VERSION})",
            checkpoint.version
        ));
    }
    if checkpoint.mode != mode {
        return ResumeValidation::invalid(format!(
            "checkpoint is for a {} run, not {mode}",
            checkpoint.mode
        ));
    }
    if checkpoint.catalog_fingerprint != catalog.fingerprint() {
        return ResumeValidation::invalid("rule catalog changed since the checkpoint was taken");
    }
    match validate_state(&checkpoint.state, catalog) {
        Ok(()) => ResumeValidation::valid(),
        Err(err) => ResumeValidation::invalid(err.to_string()),
    }
}

/// Cursor and rule-id sanity of a run state against `catalog`
pub fn validate_state(state: &RunState, catalog: &Catalog) -> Result<()> {
    if state.rule_cursor > catalog.len() {
        return Err(RepairError::InvalidState(format!(
            "rule cursor {} past the end of a {}-rule catalog",
            state.rule_cursor,
            catalog.len()
        )));
    }
    if state.chunk_cursor < 0 {
        return Err(RepairError::InvalidState(format!(
            "negative chunk cursor {}",
            state.chunk_cursor
        )));
    }
    catalog.check_known(&state.to_fix)?;
    catalog.check_known(&state.fixed)
}

pub fn load_checkpoint(path: &Path) -> Result<Checkpoint> {
    let data = fs::read(path)?;
    serde_json::from_slice(&data).map_err(|err| RepairError::Parse(err.to_string()))
}

pub fn save_checkpoint_blocking(path: &Path, checkpoint: &Checkpoint, backup: bool) -> Result<()> {
    let serialized = serde_json::to_vec_pretty(checkpoint)
        .map_err(|err| RepairError::Parse(err.to_string()))?;
    let tmp_path = path.with_extension("tmp");

    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&serialized)?;
        file.sync_all()?;
    }

    if backup && path.exists() {
        let backup_path = path.with_extension("bak");
        if let Err(err) = fs::copy(path, &backup_path) {
            tracing::warn!(path = %backup_path.display(), error = %err, "checkpoint backup failed");
        }
    }

    fs::rename(tmp_path, path)?;
    Ok(())
}

/// Where run states live between invocations, keyed by run identity
pub trait StateStore {
    fn load(&self, run_key: &str) -> Result<Option<Checkpoint>>;
    fn save(&mut self, checkpoint: &Checkpoint) -> Result<()>;
    fn clear(&mut self, run_key: &str) -> Result<()>;
    fn keys(&self) -> Result<Vec<String>>;
}

/// One pretty-printed JSON file per run key
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
    backup: bool,
}

impl FileStateStore {
    pub fn open(dir: impl Into<PathBuf>, backup: bool) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, backup })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, run_key: &str) -> Result<PathBuf> {
        let valid = !run_key.is_empty()
            && run_key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(RepairError::Config(format!("invalid run key {run_key:?}")));
        }
        Ok(self.dir.join(format!("{run_key}.json")))
    }
}

impl StateStore for FileStateStore {
    fn load(&self, run_key: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(run_key)?;
        if !path.exists() {
            return Ok(None);
        }
        load_checkpoint(&path).map(Some)
    }

    fn save(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.path_for(&checkpoint.run_key)?;
        save_checkpoint_blocking(&path, checkpoint, self.backup)?;
        tracing::debug!(path = %path.display(), "checkpoint saved");
        Ok(())
    }

    fn clear(&mut self, run_key: &str) -> Result<()> {
        let path = self.path_for(run_key)?;
        for stale in [path.clone(), path.with_extension("bak")] {
            if stale.exists() {
                fs::remove_file(&stale)?;
            }
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-process store for embedding hosts and tests
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: HashMap<String, Checkpoint>,
    saves: usize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves
    pub fn saves(&self) -> usize {
        self.saves
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, run_key: &str) -> Result<Option<Checkpoint>> {
        Ok(self.entries.get(run_key).cloned())
    }

    fn save(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        self.entries
            .insert(checkpoint.run_key.clone(), checkpoint.clone());
        self.saves += 1;
        Ok(())
    }

    fn clear(&mut self, run_key: &str) -> Result<()> {
        self.entries.remove(run_key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paused_state() -> RunState {
        RunState {
            rule_cursor: 3,
            chunk_cursor: 501,
            to_fix: vec!["missing_topic_for_message".to_string()],
            diagnostics: vec!["Message #4 is linked to non-existent topic #9.".to_string()],
            ..RunState::default()
        }
    }

    #[test]
    fn test_checkpoint_save_load_backup() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::standard().unwrap();
        let path = dir.path().join("detect.json");

        let checkpoint = Checkpoint::new("detect", ScanMode::Detect, catalog.fingerprint(), paused_state());
        save_checkpoint_blocking(&path, &checkpoint, true).unwrap();
        let loaded = load_checkpoint(&path).unwrap();
        assert_eq!(loaded, checkpoint);

        let mut later = checkpoint.clone();
        later.state.chunk_cursor = 1001;
        save_checkpoint_blocking(&path, &later, true).unwrap();
        assert!(path.with_extension("bak").exists());
        assert_eq!(load_checkpoint(&path.with_extension("bak")).unwrap().state.chunk_cursor, 501);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_resume_validation_rejects_mismatches() {
        let catalog = Catalog::standard().unwrap();
        let checkpoint = Checkpoint::new("detect", ScanMode::Detect, catalog.fingerprint(), paused_state());
        assert!(validate_resume(&checkpoint, &catalog, ScanMode::Detect).is_valid);

        let wrong_mode = validate_resume(&checkpoint, &catalog, ScanMode::Fix);
        assert!(!wrong_mode.is_valid);
        assert!(wrong_mode.reason.unwrap_or_default().contains("detect"));

        let mut stale = checkpoint.clone();
        stale.catalog_fingerprint = "0".repeat(64);
        assert!(!validate_resume(&stale, &catalog, ScanMode::Detect).is_valid);

        let mut old = checkpoint.clone();
        old.version = 0;
        assert!(validate_resume(&old, &catalog, ScanMode::Detect).into_result().is_err());

        let mut unknown = checkpoint;
        unknown.state.to_fix.push("not_a_rule".to_string());
        assert!(!validate_resume(&unknown, &catalog, ScanMode::Detect).is_valid);
    }

    #[test]
    fn test_cursor_bounds() {
        let catalog = Catalog::standard().unwrap();
        let mut state = RunState::new();
        state.rule_cursor = catalog.len();
        assert!(validate_state(&state, &catalog).is_ok());

        state.rule_cursor += 1;
        assert!(validate_state(&state, &catalog).is_err());

        state.rule_cursor = 0;
        state.chunk_cursor = -1;
        assert!(validate_state(&state, &catalog).is_err());
    }

    #[test]
    fn test_file_store_roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStateStore::open(dir.path().join("state"), true).unwrap();
        let catalog = Catalog::standard().unwrap();

        assert!(store.load("fix").unwrap().is_none());
        let checkpoint = Checkpoint::new("fix", ScanMode::Fix, catalog.fingerprint(), paused_state());
        store.save(&checkpoint).unwrap();
        store.save(&checkpoint).unwrap();
        assert_eq!(store.keys().unwrap(), vec!["fix"]);
        assert_eq!(store.load("fix").unwrap().unwrap().state, checkpoint.state);

        store.clear("fix").unwrap();
        assert!(store.load("fix").unwrap().is_none());
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn test_file_store_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path(), false).unwrap();
        assert!(store.path_for("../escape").is_err());
        assert!(store.path_for("").is_err());
        assert!(store.path_for("operator_7-detect").is_ok());
    }
}
