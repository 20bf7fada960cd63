use crate::error::{RepairError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Largest `id_batch_size` accepted. A subject-cache insert binds two
/// variables per token and SQLite allows at most 32766 per statement.
pub const MAX_ID_BATCH_SIZE: usize = 16_000;

/// Budget and batching knobs for one repair run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Elapsed time after which a chunked rule with chunks left yields
    pub soft_elapsed_ms: u64,

    /// Elapsed time after which the invocation always yields
    pub hard_elapsed_ms: u64,

    /// Statements per invocation before yielding
    pub max_queries: u64,

    /// Full passes a fix run may take to settle cascaded rules
    pub max_fix_passes: u32,

    /// Ids per IN-list and tokens per insert batch
    pub id_batch_size: usize,

    /// Keep a `.bak` copy of the previous checkpoint file
    pub backup_checkpoints: bool,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            soft_elapsed_ms: 3_000,
            hard_elapsed_ms: 10_000,
            max_queries: 1_000,
            max_fix_passes: 2,
            id_batch_size: 500,
            backup_checkpoints: true,
        }
    }
}

impl RepairConfig {
    /// Load a config file; missing fields take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        let config: Self =
            serde_json::from_slice(&data).map_err(|err| RepairError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_queries == 0 {
            return Err(RepairError::Config("max_queries must be greater than 0".to_string()));
        }
        if self.max_fix_passes == 0 {
            return Err(RepairError::Config(
                "max_fix_passes must be greater than 0".to_string(),
            ));
        }
        if self.id_batch_size == 0 {
            return Err(RepairError::Config(
                "id_batch_size must be greater than 0".to_string(),
            ));
        }
        if self.id_batch_size > MAX_ID_BATCH_SIZE {
            return Err(RepairError::Config(format!(
                "id_batch_size ({}) cannot exceed {MAX_ID_BATCH_SIZE}",
                self.id_batch_size
            )));
        }
        if self.soft_elapsed_ms > self.hard_elapsed_ms {
            return Err(RepairError::Config(format!(
                "soft_elapsed_ms ({}) cannot be greater than hard_elapsed_ms ({})",
                self.soft_elapsed_ms, self.hard_elapsed_ms
            )));
        }
        Ok(())
    }

    pub fn soft_elapsed(&self) -> Duration {
        Duration::from_millis(self.soft_elapsed_ms)
    }

    pub fn hard_elapsed(&self) -> Duration {
        Duration::from_millis(self.hard_elapsed_ms)
    }

    /// Config that never yields on time; useful for single-shot runs
    pub fn unbounded() -> Self {
        Self {
            soft_elapsed_ms: u64::MAX,
            hard_elapsed_ms: u64::MAX,
            max_queries: u64::MAX,
            ..Self::default()
        }
    }
}
