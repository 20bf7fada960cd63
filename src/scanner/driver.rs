//! Top-level scan loop.
//!
//! One call to [`ScanDriver::step`] is one bounded burst of work. It walks
//! the catalog from the state's cursor, chunking rules over their id-space,
//! and returns either [`StepOutcome::Paused`] with the state to resume from
//! or [`StepOutcome::Done`].
//!
//! In fix mode a rule's issues are buffered while its chunks are swept and
//! dispatched once the sweep ends, or just before the invocation pauses so
//! no detected window is carried across a pause.

use rusqlite::types::Value;
use rusqlite::Connection;

use super::chunks::{ChunkPlan, ChunkWindow};
use super::controller::{CheckpointController, PausePoint};
use crate::catalog::{Catalog, CheckKind, ReportContext, Reporter, RuleDefinition};
use crate::checkpoint::{validate_resume, validate_state, StateStore};
use crate::config::RepairConfig;
use crate::error::{RepairError, Result};
use crate::locale::Localizer;
use crate::recovery::{FixDispatcher, Issue, SalvageContext};
use crate::store::{self, FetchedRow};
use crate::tokenizer::Tokenizer;
use crate::types::{Completion, PauseReason, RunState, ScanMode, StepOutcome};

/// How a rule's sweep ended
enum Sweep {
    Finished,
    Paused {
        reason: PauseReason,
        chunk_max: i64,
    },
}

pub struct ScanDriver<'a> {
    conn: &'a Connection,
    catalog: &'a Catalog,
    config: &'a RepairConfig,
    localizer: &'a dyn Localizer,
    tokenizer: &'a dyn Tokenizer,
}

/// Mutable pieces of one invocation
struct Invocation<'s> {
    mode: ScanMode,
    state: RunState,
    controller: CheckpointController,
    salvage: SalvageContext,
    store: &'s mut dyn StateStore,
    run_key: &'s str,
}

impl<'a> ScanDriver<'a> {
    pub fn new(
        conn: &'a Connection,
        catalog: &'a Catalog,
        config: &'a RepairConfig,
        localizer: &'a dyn Localizer,
        tokenizer: &'a dyn Tokenizer,
    ) -> Self {
        Self {
            conn,
            catalog,
            config,
            localizer,
            tokenizer,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        self.catalog
    }

    /// Run one bounded invocation starting from `resume`, or from scratch.
    ///
    /// A fix run starts from [`RunState::for_fix`] over the operator-approved
    /// detect result.
    pub fn step(
        &self,
        mode: ScanMode,
        resume: Option<RunState>,
        store: &mut dyn StateStore,
        run_key: &str,
    ) -> Result<StepOutcome> {
        let mut state = resume.unwrap_or_default();
        validate_state(&state, self.catalog)?;
        state.queries_executed = 0;
        state.invocations += 1;

        let mut inv = Invocation {
            mode,
            state,
            controller: CheckpointController::start(self.config),
            salvage: SalvageContext::from_localizer(self.localizer),
            store,
            run_key,
        };
        tracing::debug!(
            run_key,
            %mode,
            rule_cursor = inv.state.rule_cursor,
            chunk_cursor = inv.state.chunk_cursor,
            pass = inv.state.pass,
            "invocation started"
        );
        self.drive(&mut inv)
    }

    /// Resume the run persisted under `run_key`, or start from `initial`
    pub fn resume_or_start(
        &self,
        mode: ScanMode,
        initial: RunState,
        store: &mut dyn StateStore,
        run_key: &str,
    ) -> Result<StepOutcome> {
        let state = match store.load(run_key)? {
            Some(checkpoint) => {
                validate_resume(&checkpoint, self.catalog, mode).into_result()?;
                tracing::info!(
                    run_key,
                    rule_cursor = checkpoint.state.rule_cursor,
                    created_at = %checkpoint.created_at,
                    "resuming from checkpoint"
                );
                checkpoint.state
            }
            None => initial,
        };
        self.step(mode, Some(state), store, run_key)
    }

    /// Drive invocations back to back until the run completes
    pub fn run_to_completion(
        &self,
        mode: ScanMode,
        initial: RunState,
        store: &mut dyn StateStore,
        run_key: &str,
    ) -> Result<Completion> {
        let mut state = initial;
        loop {
            match self.step(mode, Some(state), store, run_key)? {
                StepOutcome::Done(completion) => return Ok(completion),
                StepOutcome::Paused(progress) => state = progress.state,
            }
        }
    }

    fn drive(&self, inv: &mut Invocation<'_>) -> Result<StepOutcome> {
        let total = self.catalog.len();
        loop {
            while inv.state.rule_cursor < total {
                let rule = self.rule_at(inv.state.rule_cursor)?;
                if inv.mode == ScanMode::Fix && !inv.state.is_marked(rule.id) {
                    inv.state.advance_rule();
                    continue;
                }

                if let Sweep::Paused { reason, chunk_max } = self.sweep(inv, rule)? {
                    return self.pause(inv, reason, Some(chunk_max));
                }
                self.finish_rule(inv, rule);

                if inv.state.rule_cursor < total {
                    if let Some(reason) = inv.controller.check(inv.state.queries_executed, false)
                    {
                        return self.pause(inv, reason, None);
                    }
                }
            }

            if inv.mode == ScanMode::Fix
                && !inv.state.to_fix.is_empty()
                && inv.state.pass + 1 < self.config.max_fix_passes
            {
                inv.state.pass += 1;
                inv.state.rule_cursor = 0;
                inv.state.chunk_cursor = 0;
                tracing::info!(
                    pass = inv.state.pass,
                    pending = ?inv.state.to_fix,
                    "starting another fix pass for cascaded rules"
                );
                continue;
            }
            return self.complete(inv);
        }
    }

    fn rule_at(&self, index: usize) -> Result<&'a RuleDefinition> {
        self.catalog
            .get(index)
            .ok_or_else(|| RepairError::InvalidState(format!("no rule at index {index}")))
    }

    fn sweep(&self, inv: &mut Invocation<'_>, rule: &RuleDefinition) -> Result<Sweep> {
        let chunk = match rule.chunk {
            Some(_) if inv.mode == ScanMode::Fix && rule.fixes_unchunked() => None,
            chunk => chunk,
        };

        let mut pending = Vec::new();
        let Some(spec) = chunk else {
            self.check(inv, rule, None, &mut pending)?;
            self.dispatch(inv, rule, &pending)?;
            return Ok(Sweep::Finished);
        };

        inv.state.queries_executed += 1;
        let max_id = store::query_scalar(self.conn, spec.max_id_sql, None)?;
        let Some(plan) = ChunkPlan::new(max_id, spec.step) else {
            tracing::debug!(rule = rule.id, "empty id space");
            return Ok(Sweep::Finished);
        };

        for window in plan.windows_from(inv.state.chunk_cursor) {
            self.check(inv, rule, Some(window), &mut pending)?;
            inv.state.chunk_cursor = window.high;

            if !plan.has_remaining(inv.state.chunk_cursor) {
                break;
            }
            if let Some(reason) = inv.controller.check(inv.state.queries_executed, true) {
                self.dispatch(inv, rule, &pending)?;
                return Ok(Sweep::Paused {
                    reason,
                    chunk_max: plan.max_id,
                });
            }
        }

        self.dispatch(inv, rule, &pending)?;
        Ok(Sweep::Finished)
    }

    /// Run the rule's check over one window and classify the result
    fn check(
        &self,
        inv: &mut Invocation<'_>,
        rule: &RuleDefinition,
        window: Option<ChunkWindow>,
        pending: &mut Vec<Issue>,
    ) -> Result<()> {
        inv.state.queries_executed += 1;
        let rows = match rule.check {
            CheckKind::Count => {
                let count = store::query_scalar(self.conn, rule.check_sql, window)?;
                if count <= 0 {
                    Vec::new()
                } else {
                    vec![FetchedRow::new(vec![Value::Integer(count)])]
                }
            }
            CheckKind::RowSet { .. } => {
                store::query_rows(self.conn, rule.check_sql, window, rule.shape())?
            }
        };

        if let Some(window) = window {
            tracing::debug!(rule = rule.id, low = window.low, high = window.high, rows = rows.len(), "checked chunk");
        } else {
            tracing::debug!(rule = rule.id, rows = rows.len(), "checked rule");
        }
        if rows.is_empty() {
            return Ok(());
        }

        match inv.mode {
            ScanMode::Detect => {
                let messages = self.render(rule, &rows)?;
                let false_positive =
                    messages.is_empty() && matches!(rule.report, Some(Reporter::Function(_)));
                if !false_positive {
                    inv.state.mark(rule.id);
                    inv.state.diagnostics.extend(messages);
                }
            }
            ScanMode::Fix => pending.push(Issue {
                rule: rule.id,
                window,
                rows,
            }),
        }
        Ok(())
    }

    fn render(&self, rule: &RuleDefinition, rows: &[FetchedRow]) -> Result<Vec<String>> {
        let mut messages = Vec::new();
        match rule.report {
            None => {}
            Some(Reporter::Template { key, args }) => {
                for row in rows {
                    let values: Vec<String> = if args.is_empty() {
                        (0..row.len()).map(|i| row.display(i)).collect()
                    } else {
                        args.iter().map(|&i| row.display(i)).collect()
                    };
                    messages.push(self.localizer.render(key, &values));
                }
            }
            Some(Reporter::Function(report)) => {
                let ctx = ReportContext {
                    conn: self.conn,
                    localizer: self.localizer,
                    tokenizer: self.tokenizer,
                };
                for row in rows {
                    if let Some(message) = report(&ctx, row)? {
                        messages.push(message);
                    }
                }
            }
        }
        Ok(messages)
    }

    fn dispatch(&self, inv: &mut Invocation<'_>, rule: &RuleDefinition, pending: &[Issue]) -> Result<()> {
        if inv.mode != ScanMode::Fix || pending.is_empty() {
            return Ok(());
        }
        let dispatcher = FixDispatcher::new(
            self.conn,
            self.localizer,
            self.tokenizer,
            self.config.id_batch_size,
        );
        let outcome = dispatcher.dispatch(rule, pending, &mut inv.salvage)?;
        inv.state.queries_executed += outcome.statements;
        Ok(())
    }

    fn finish_rule(&self, inv: &mut Invocation<'_>, rule: &RuleDefinition) {
        let state = &mut inv.state;
        match inv.mode {
            ScanMode::Detect => {
                if state.is_marked(rule.id) {
                    for target in rule.cascades_to {
                        state.mark(target);
                    }
                }
            }
            ScanMode::Fix => {
                for target in rule.cascades_to {
                    state.mark(target);
                }
                state.unmark(rule.id);
                if !state.fixed.iter().any(|id| id == rule.id) {
                    state.fixed.push(rule.id.to_string());
                }
            }
        }
        tracing::info!(
            rule = rule.id,
            mode = %inv.mode,
            queries = state.queries_executed,
            to_fix = state.to_fix.len(),
            "rule complete"
        );
        state.advance_rule();
    }

    fn pause(
        &self,
        inv: &mut Invocation<'_>,
        reason: PauseReason,
        chunk_max: Option<i64>,
    ) -> Result<StepOutcome> {
        let current_rule = self
            .catalog
            .get(inv.state.rule_cursor)
            .map(|rule| self.localizer.rule_label(rule.id))
            .unwrap_or_default();
        let point = PausePoint {
            run_key: inv.run_key,
            mode: inv.mode,
            catalog_fingerprint: self.catalog.fingerprint(),
            total_rules: self.catalog.len(),
            current_rule,
            chunk_max,
        };
        let progress = inv.controller.pause(inv.store, point, &inv.state, reason)?;
        Ok(StepOutcome::Paused(progress))
    }

    fn complete(&self, inv: &mut Invocation<'_>) -> Result<StepOutcome> {
        inv.store.clear(inv.run_key)?;
        let state = std::mem::take(&mut inv.state);
        let completion = match inv.mode {
            ScanMode::Detect => Completion::Detect {
                to_fix: state.to_fix,
                diagnostics: state.diagnostics,
            },
            ScanMode::Fix => Completion::Fix {
                fixed: state.fixed,
                unresolved: state.to_fix,
            },
        };
        tracing::info!(
            run_key = inv.run_key,
            mode = %inv.mode,
            invocations = state.invocations,
            queries = state.queries_executed,
            elapsed_ms = inv.controller.elapsed().as_millis() as u64,
            "run complete"
        );
        Ok(StepOutcome::Done(completion))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ChunkSpec, FixStrategy};
    use crate::checkpoint::MemoryStateStore;
    use crate::locale::MessageCatalog;
    use crate::schema;
    use crate::tokenizer::WordTokenizer;

    fn seeded(sql: &str) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::install(&conn).unwrap();
        conn.execute_batch(sql).unwrap();
        conn
    }

    fn notify_rule(id: &'static str, cascades_to: &'static [&'static str]) -> RuleDefinition {
        RuleDefinition {
            id,
            check_sql: "SELECT ln.id_member FROM log_notify AS ln
                LEFT JOIN members AS m ON m.id_member = ln.id_member
                WHERE m.id_member IS NULL AND ln.id_member >= :low AND ln.id_member < :high
                ORDER BY ln.id_member",
            check: CheckKind::RowSet {
                columns: &["id_member"],
            },
            chunk: Some(ChunkSpec {
                step: 2,
                max_id_sql: "SELECT MAX(id_member) FROM log_notify",
            }),
            fix: FixStrategy::BlindQuery(
                "DELETE FROM log_notify WHERE id_member >= :low AND id_member < :high
                    AND id_member NOT IN (SELECT id_member FROM members)",
            ),
            report: Some(Reporter::Template {
                key: "missing_notify_members",
                args: &[0],
            }),
            cascades_to,
        }
    }

    fn quiet_rule(id: &'static str) -> RuleDefinition {
        RuleDefinition {
            id,
            check_sql: "SELECT COUNT(*) FROM members WHERE id_member < 0",
            check: CheckKind::Count,
            chunk: None,
            fix: FixStrategy::BlindQuery("DELETE FROM members WHERE id_member < 0"),
            report: None,
            cascades_to: &[],
        }
    }

    #[test]
    fn test_detect_collects_diagnostics_and_cascades() {
        let conn = seeded(
            "INSERT INTO members (id_member) VALUES (1);
             INSERT INTO log_notify (id_member) VALUES (1), (2), (5);",
        );
        let catalog =
            Catalog::new(vec![notify_rule("orphans", &["recount"]), quiet_rule("recount")]).unwrap();
        let config = RepairConfig::unbounded();
        let messages = MessageCatalog::english();
        let tokenizer = WordTokenizer::default();
        let driver = ScanDriver::new(&conn, &catalog, &config, &messages, &tokenizer);
        let mut store = MemoryStateStore::new();

        let outcome = driver.step(ScanMode::Detect, None, &mut store, "detect").unwrap();
        let StepOutcome::Done(Completion::Detect { to_fix, diagnostics }) = outcome else {
            panic!("expected a finished detect run");
        };
        assert_eq!(to_fix, vec!["orphans", "recount"]);
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics[1].contains("#5"));
        assert_eq!(store.saves(), 0);
    }

    #[test]
    fn test_query_ceiling_pauses_between_chunks() {
        let conn = seeded("INSERT INTO log_notify (id_member) VALUES (2), (5), (9);");
        let catalog = Catalog::new(vec![notify_rule("orphans", &[])]).unwrap();
        let config = RepairConfig {
            max_queries: 2,
            ..RepairConfig::unbounded()
        };
        let messages = MessageCatalog::english();
        let tokenizer = WordTokenizer::default();
        let driver = ScanDriver::new(&conn, &catalog, &config, &messages, &tokenizer);
        let mut store = MemoryStateStore::new();

        let StepOutcome::Paused(progress) =
            driver.step(ScanMode::Detect, None, &mut store, "detect").unwrap()
        else {
            panic!("expected a pause");
        };
        assert_eq!(progress.reason, PauseReason::QueryCeiling);
        assert_eq!(progress.state.chunk_cursor, 3);
        assert_eq!(progress.diagnostics.len(), 1);
        assert_eq!(progress.state.invocations, 1);
        let saved = store.load("detect").unwrap().unwrap();
        assert_eq!(saved.state.invocations, 1);

        let completion = driver
            .run_to_completion(ScanMode::Detect, progress.state, &mut store, "detect")
            .unwrap();
        let Completion::Detect { diagnostics, .. } = completion else {
            panic!("expected detect completion");
        };
        assert_eq!(diagnostics.len(), 3);
        assert!(store.load("detect").unwrap().is_none());
    }

    #[test]
    fn test_fix_skips_unselected_rules() {
        let conn = seeded("INSERT INTO log_notify (id_member) VALUES (3);");
        let catalog = Catalog::new(vec![quiet_rule("recount"), notify_rule("orphans", &[])]).unwrap();
        let config = RepairConfig::unbounded();
        let messages = MessageCatalog::english();
        let tokenizer = WordTokenizer::default();
        let driver = ScanDriver::new(&conn, &catalog, &config, &messages, &tokenizer);
        let mut store = MemoryStateStore::new();

        let completion = driver
            .run_to_completion(ScanMode::Fix, RunState::for_fix(["orphans"]), &mut store, "fix")
            .unwrap();
        assert_eq!(
            completion,
            Completion::Fix {
                fixed: vec!["orphans".to_string()],
                unresolved: Vec::new(),
            }
        );
        let left: i64 = conn
            .query_row("SELECT COUNT(*) FROM log_notify", [], |row| row.get(0))
            .unwrap();
        assert_eq!(left, 0);
    }

    #[test]
    fn test_cascade_behind_cursor_needs_another_pass() {
        let conn = seeded("INSERT INTO log_notify (id_member) VALUES (3);");
        let catalog = Catalog::new(vec![quiet_rule("recount"), notify_rule("orphans", &["recount"])]).unwrap();
        let messages = MessageCatalog::english();
        let tokenizer = WordTokenizer::default();
        let mut store = MemoryStateStore::new();

        let single = RepairConfig {
            max_fix_passes: 1,
            ..RepairConfig::unbounded()
        };
        let driver = ScanDriver::new(&conn, &catalog, &single, &messages, &tokenizer);
        let completion = driver
            .run_to_completion(ScanMode::Fix, RunState::for_fix(["orphans"]), &mut store, "fix")
            .unwrap();
        assert_eq!(
            completion,
            Completion::Fix {
                fixed: vec!["orphans".to_string()],
                unresolved: vec!["recount".to_string()],
            }
        );

        let two = RepairConfig::unbounded();
        let driver = ScanDriver::new(&conn, &catalog, &two, &messages, &tokenizer);
        let completion = driver
            .run_to_completion(ScanMode::Fix, RunState::for_fix(["orphans"]), &mut store, "fix")
            .unwrap();
        let Completion::Fix { fixed, unresolved } = completion else {
            panic!("expected fix completion");
        };
        assert_eq!(fixed, vec!["orphans", "recount"]);
        assert!(unresolved.is_empty());
    }

    #[test]
    fn test_resume_rejects_foreign_checkpoint() {
        let conn = seeded("");
        let catalog = Catalog::new(vec![quiet_rule("recount")]).unwrap();
        let config = RepairConfig::unbounded();
        let messages = MessageCatalog::english();
        let tokenizer = WordTokenizer::default();
        let driver = ScanDriver::new(&conn, &catalog, &config, &messages, &tokenizer);

        let mut store = MemoryStateStore::new();
        let checkpoint = crate::checkpoint::Checkpoint::new(
            "detect",
            ScanMode::Fix,
            catalog.fingerprint(),
            RunState::new(),
        );
        store.save(&checkpoint).unwrap();

        let err = driver
            .resume_or_start(ScanMode::Detect, RunState::new(), &mut store, "detect")
            .unwrap_err();
        assert!(matches!(err, RepairError::InvalidState(_)));

        let bad_cursor = RunState {
            rule_cursor: 5,
            ..RunState::default()
        };
        assert!(driver
            .step(ScanMode::Detect, Some(bad_cursor), &mut store, "other")
            .is_err());
    }
}
