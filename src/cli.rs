use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::RepairConfig;
use crate::error::Result;

/// Forum database integrity repair
/// Detects broken references and stale counters, then fixes them in bounded bursts
#[derive(Parser, Debug, Clone)]
#[command(name = "forum-repair")]
#[command(version = "0.1.0")]
#[command(about = "Forum database integrity repair", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding resumable run state (default: <DATABASE>.repair)
    #[arg(long = "state-dir", global = true)]
    pub state_dir: Option<PathBuf>,

    /// JSON file with budget and batching settings
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// JSON object of message template overrides
    #[arg(long = "messages", global = true)]
    pub messages: Option<PathBuf>,

    /// Soft time budget per invocation in milliseconds
    #[arg(long = "soft-ms", global = true)]
    pub soft_ms: Option<u64>,

    /// Hard time budget per invocation in milliseconds
    #[arg(long = "hard-ms", global = true)]
    pub hard_ms: Option<u64>,

    /// Statement ceiling per invocation
    #[arg(long = "max-queries", global = true)]
    pub max_queries: Option<u64>,

    /// Emit logs as JSON lines
    #[arg(long = "log-json", global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Scan the database and record which rules need fixing
    Detect(RunArgs),

    /// Fix the rules recorded by the last detect run
    Fix {
        #[command(flatten)]
        run: RunArgs,

        /// Skip the confirmation prompt
        #[arg(long = "yes", short = 'y')]
        yes: bool,
    },

    /// Show pending checkpoints and the recorded detect result
    Status {
        #[arg(value_name = "DATABASE")]
        database: PathBuf,
    },

    /// Discard all persisted run state
    Reset {
        #[arg(value_name = "DATABASE")]
        database: PathBuf,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// SQLite database to scan
    #[arg(value_name = "DATABASE")]
    pub database: PathBuf,

    /// Run a single bounded invocation and leave continuation to the next call
    #[arg(long = "single-step")]
    pub single_step: bool,

    /// Output directory for run reports
    #[arg(short = 'o', long = "output", default_value = "repair_output")]
    pub output: PathBuf,
}

impl Args {
    /// Validate the arguments
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.database().as_os_str().is_empty() {
            return Err("Database path cannot be empty".to_string());
        }

        if let (Some(soft), Some(hard)) = (self.soft_ms, self.hard_ms) {
            if soft > hard {
                return Err(format!(
                    "soft-ms ({soft}) cannot be greater than hard-ms ({hard})"
                ));
            }
        }

        if self.max_queries == Some(0) {
            return Err("max-queries must be greater than 0".to_string());
        }

        Ok(())
    }

    pub fn database(&self) -> &Path {
        match &self.command {
            Command::Detect(run) | Command::Fix { run, .. } => &run.database,
            Command::Status { database } | Command::Reset { database } => database,
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| self.database().with_extension("repair"))
    }

    /// Config file (or defaults) with command-line overrides applied
    pub fn repair_config(&self) -> Result<RepairConfig> {
        let mut config = match &self.config {
            Some(path) => RepairConfig::from_file(path)?,
            None => RepairConfig::default(),
        };
        if let Some(soft) = self.soft_ms {
            config.soft_elapsed_ms = soft;
        }
        if let Some(hard) = self.hard_ms {
            config.hard_elapsed_ms = hard;
        }
        if let Some(max_queries) = self.max_queries {
            config.max_queries = max_queries;
        }
        config.validate()?;
        Ok(config)
    }
}
