use std::time::{Duration, Instant};

use crate::checkpoint::{Checkpoint, StateStore};
use crate::config::RepairConfig;
use crate::error::Result;
use crate::types::{PauseReason, Progress, RunState, ScanMode};

/// Where a run stopped, as needed to persist it and describe it
#[derive(Debug, Clone)]
pub struct PausePoint<'a> {
    pub run_key: &'a str,
    pub mode: ScanMode,
    pub catalog_fingerprint: &'a str,
    pub total_rules: usize,
    /// Label of the rule at the cursor
    pub current_rule: String,
    /// Upper id bound of the rule being chunked, if paused mid-rule
    pub chunk_max: Option<i64>,
}

/// Decides when an invocation yields.
///
/// While running, [`check`](Self::check) is a pure predicate; only
/// [`pause`](Self::pause) has side effects.
#[derive(Debug, Clone)]
pub struct CheckpointController {
    started: Instant,
    soft: Duration,
    hard: Duration,
    max_queries: u64,
}

impl CheckpointController {
    pub fn start(config: &RepairConfig) -> Self {
        Self::started_at(Instant::now(), config)
    }

    pub fn started_at(started: Instant, config: &RepairConfig) -> Self {
        Self {
            started,
            soft: config.soft_elapsed(),
            hard: config.hard_elapsed(),
            max_queries: config.max_queries,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn check(&self, queries: u64, chunks_remaining: bool) -> Option<PauseReason> {
        self.check_at(self.elapsed(), queries, chunks_remaining)
    }

    pub fn check_at(
        &self,
        elapsed: Duration,
        queries: u64,
        chunks_remaining: bool,
    ) -> Option<PauseReason> {
        if elapsed >= self.hard {
            Some(PauseReason::WallClock)
        } else if queries >= self.max_queries {
            Some(PauseReason::QueryCeiling)
        } else if chunks_remaining && elapsed >= self.soft {
            Some(PauseReason::ChunkBudget)
        } else {
            None
        }
    }

    /// Persist `state` and build the progress report for the host
    pub fn pause(
        &self,
        store: &mut dyn StateStore,
        point: PausePoint<'_>,
        state: &RunState,
        reason: PauseReason,
    ) -> Result<Progress> {
        let checkpoint = Checkpoint::new(
            point.run_key,
            point.mode,
            point.catalog_fingerprint,
            state.clone(),
        );
        store.save(&checkpoint)?;

        let percent_complete = percent_complete(
            state.rule_cursor,
            state.chunk_cursor,
            point.chunk_max,
            point.total_rules,
        );
        tracing::info!(
            run_key = point.run_key,
            mode = %point.mode,
            rule = %point.current_rule,
            reason = %reason,
            queries = state.queries_executed,
            elapsed_ms = self.elapsed().as_millis() as u64,
            percent = percent_complete,
            "pausing"
        );

        Ok(Progress {
            percent_complete,
            current_rule: point.current_rule,
            reason,
            diagnostics: state.diagnostics.clone(),
            state: state.clone(),
        })
    }
}

/// `100 * (rule_cursor + chunk fraction) / total_rules`
pub fn percent_complete(
    rule_cursor: usize,
    chunk_cursor: i64,
    chunk_max: Option<i64>,
    total_rules: usize,
) -> f64 {
    if total_rules == 0 {
        return 100.0;
    }
    let fraction = match chunk_max {
        Some(max) if max > 0 => ((chunk_cursor - 1).max(0) as f64 / max as f64).min(1.0),
        _ => 0.0,
    };
    (100.0 * (rule_cursor as f64 + fraction) / total_rules as f64).min(100.0)
}
