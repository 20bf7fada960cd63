use super::salvage::SalvageContext;
use crate::catalog::{Applied, FixStrategy, RuleDefinition};
use crate::config::MAX_ID_BATCH_SIZE;
use crate::error::{RepairError, Result};
use crate::locale::Localizer;
use crate::scanner::ChunkWindow;
use crate::store::{self, FetchedRow, RowShape};
use crate::tokenizer::Tokenizer;
use crate::types::RuleId;
use rusqlite::{Connection, OptionalExtension, Params};
use std::collections::HashSet;

/// Rows one chunk of a check produced; consumed by the dispatcher, never persisted
#[derive(Debug, Clone)]
pub struct Issue {
    pub rule: RuleId,
    pub window: Option<ChunkWindow>,
    pub rows: Vec<FetchedRow>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixOutcome {
    pub statements: u64,
    pub applied: usize,
    pub skipped: usize,
}

impl FixOutcome {
    fn absorb(&mut self, other: FixOutcome) {
        self.statements += other.statements;
        self.applied += other.applied;
        self.skipped += other.skipped;
    }
}

/// Handles a fix callback works through.
///
/// Every statement issued here is counted toward the invocation's query
/// ceiling.
pub struct FixContext<'a> {
    conn: &'a Connection,
    salvage: &'a mut SalvageContext,
    localizer: &'a dyn Localizer,
    tokenizer: &'a dyn Tokenizer,
    window: Option<ChunkWindow>,
    batch_size: usize,
    statements: u64,
}

impl<'a> FixContext<'a> {
    pub fn new(
        conn: &'a Connection,
        salvage: &'a mut SalvageContext,
        localizer: &'a dyn Localizer,
        tokenizer: &'a dyn Tokenizer,
        batch_size: usize,
    ) -> Self {
        Self {
            conn,
            salvage,
            localizer,
            tokenizer,
            window: None,
            batch_size: batch_size.clamp(1, MAX_ID_BATCH_SIZE),
            statements: 0,
        }
    }

    pub fn conn(&self) -> &'a Connection {
        self.conn
    }

    /// Chunk window the issue being fixed was found in
    pub fn window(&self) -> Option<ChunkWindow> {
        self.window
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn statements(&self) -> u64 {
        self.statements
    }

    pub fn text(&self, key: &str) -> String {
        self.localizer.text(key)
    }

    pub fn words(&self, text: &str) -> Vec<String> {
        self.tokenizer.words(text)
    }

    pub fn execute<P: Params>(&mut self, sql: &str, params: P) -> Result<usize> {
        self.statements += 1;
        Ok(self.conn.execute(sql, params)?)
    }

    /// Run an INSERT and return the new row id
    pub fn insert<P: Params>(&mut self, sql: &str, params: P) -> Result<i64> {
        self.statements += 1;
        self.conn.execute(sql, params)?;
        Ok(self.conn.last_insert_rowid())
    }

    /// First column of the first row; `None` for no row or NULL
    pub fn query_i64<P: Params>(&mut self, sql: &str, params: P) -> Result<Option<i64>> {
        self.statements += 1;
        let value = self
            .conn
            .query_row(sql, params, |row| row.get::<_, Option<i64>>(0))
            .optional()?;
        Ok(value.flatten())
    }

    /// Run `template` with `{ids}` expanded, in batches of `batch_size`
    pub fn execute_for_ids(&mut self, template: &str, ids: &[i64]) -> Result<usize> {
        let (statements, changed) =
            store::execute_for_ids(self.conn, template, ids, self.batch_size)?;
        self.statements += statements;
        Ok(changed)
    }

    pub fn salvage_board(&mut self) -> Result<i64> {
        let before = self.salvage.statements();
        let id = self.salvage.board(self.conn);
        self.statements += self.salvage.statements() - before;
        id
    }

    pub fn salvage_category(&mut self) -> Result<i64> {
        let before = self.salvage.statements();
        let id = self.salvage.category(self.conn);
        self.statements += self.salvage.statements() - before;
        id
    }
}

/// Routes a rule's issues to its fix strategy
pub struct FixDispatcher<'a> {
    conn: &'a Connection,
    localizer: &'a dyn Localizer,
    tokenizer: &'a dyn Tokenizer,
    batch_size: usize,
}

impl<'a> FixDispatcher<'a> {
    pub fn new(
        conn: &'a Connection,
        localizer: &'a dyn Localizer,
        tokenizer: &'a dyn Tokenizer,
        batch_size: usize,
    ) -> Self {
        Self {
            conn,
            localizer,
            tokenizer,
            batch_size,
        }
    }

    /// Apply `rule`'s fix to every issue its check produced
    pub fn dispatch(
        &self,
        rule: &RuleDefinition,
        issues: &[Issue],
        salvage: &mut SalvageContext,
    ) -> Result<FixOutcome> {
        if let Some(stray) = issues.iter().find(|issue| issue.rule != rule.id) {
            return Err(RepairError::InvalidState(format!(
                "issue for {} dispatched to {}",
                stray.rule, rule.id
            )));
        }
        if issues.is_empty() {
            return Ok(FixOutcome::default());
        }

        let mut ctx = FixContext::new(
            self.conn,
            salvage,
            self.localizer,
            self.tokenizer,
            self.batch_size,
        );

        let mut outcome = FixOutcome::default();
        match rule.fix {
            FixStrategy::BatchCollect { key_column, apply } => {
                let ids = collect_keys(rule, key_column, issues)?;
                outcome.applied = apply(&mut ctx, &ids)?;
            }
            strategy => {
                for issue in issues {
                    ctx.window = issue.window;
                    outcome.absorb(apply_windowed(&mut ctx, rule, strategy)?);
                }
            }
        }
        outcome.statements += ctx.statements;

        tracing::info!(
            rule = rule.id,
            strategy = rule.fix.name(),
            applied = outcome.applied,
            skipped = outcome.skipped,
            statements = outcome.statements,
            "applied fix"
        );
        Ok(outcome)
    }
}

fn apply_windowed(
    ctx: &mut FixContext<'_>,
    rule: &RuleDefinition,
    strategy: FixStrategy,
) -> Result<FixOutcome> {
    let mut outcome = FixOutcome::default();
    match strategy {
        FixStrategy::BlindQuery(sql) => {
            ctx.statements += 1;
            outcome.applied = store::execute_scoped(ctx.conn, sql, ctx.window)?;
        }
        FixStrategy::RowCallback {
            fetch_sql,
            columns,
            apply,
        } => {
            let shape = RowShape {
                rule: rule.id,
                columns,
            };
            ctx.statements += 1;
            let rows = store::query_rows(ctx.conn, fetch_sql, ctx.window, shape)?;
            for row in &rows {
                match apply(ctx, row)? {
                    Applied::Applied => outcome.applied += 1,
                    Applied::Skipped => {
                        tracing::warn!(rule = rule.id, row = ?row, "row no longer needs fixing");
                        outcome.skipped += 1;
                    }
                }
            }
        }
        FixStrategy::CursorStream { fetch_sql, apply } => {
            let conn = ctx.conn;
            let mut stmt = conn.prepare(fetch_sql)?;
            store::bind_window(&mut stmt, ctx.window)?;
            ctx.statements += 1;
            let mut rows = stmt.raw_query();
            outcome.applied = apply(ctx, &mut rows)?;
        }
        FixStrategy::BatchCollect { .. } => {
            return Err(RepairError::InvalidState(format!(
                "{} collects ids across windows",
                rule.id
            )));
        }
    }
    Ok(outcome)
}

/// Distinct, non-zero key values across every issue, in first-seen order
fn collect_keys(rule: &RuleDefinition, key_column: &str, issues: &[Issue]) -> Result<Vec<i64>> {
    let index = rule.column_index(key_column).ok_or_else(|| {
        RepairError::Catalog(format!("{} has no column {key_column}", rule.id))
    })?;

    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for row in issues.iter().flat_map(|issue| &issue.rows) {
        let id = row.int(index)?;
        if seen.insert(id) {
            ids.push(id);
        }
    }
    Ok(ids)
}
