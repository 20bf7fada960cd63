//! Declarative catalog of integrity rules.
//!
//! Every rule is pure data: a check query, an optional chunking spec, one
//! [`FixStrategy`], an optional reporter and the rules its correction
//! invalidates. Building the catalog never touches the database.
//!
//! Catalog order is a contract: a rule may rely on every rule before it
//! having run (e.g. topic statistics are recomputed only after orphaned
//! messages have been regrouped into topics).

mod rules;

use crate::error::{RepairError, Result};
use crate::locale::Localizer;
use crate::recovery::FixContext;
use crate::store::{FetchedRow, RowShape};
use crate::tokenizer::Tokenizer;
use crate::types::RuleId;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

pub use rules::standard_rules;

/// How a check query's result is classified
#[derive(Debug, Clone, Copy)]
pub enum CheckKind {
    /// First column of the first row; fires when greater than zero
    Count,
    /// Fires when any row is returned; `columns` is the declared row shape
    RowSet { columns: &'static [&'static str] },
}

impl CheckKind {
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            CheckKind::Count => &[],
            CheckKind::RowSet { columns } => columns,
        }
    }
}

/// Chunking over an unbounded id-space
#[derive(Debug, Clone, Copy)]
pub struct ChunkSpec {
    /// Ids per window
    pub step: i64,
    /// Scalar query resolving the upper bound of the id-space
    pub max_id_sql: &'static str,
}

/// Outcome of a per-row correction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Applied,
    /// The row no longer needed fixing by the time the fix ran
    Skipped,
}

pub type RowFixFn = fn(&mut FixContext<'_>, &FetchedRow) -> Result<Applied>;
pub type BatchFixFn = fn(&mut FixContext<'_>, &[i64]) -> Result<usize>;
pub type StreamFixFn = fn(&mut FixContext<'_>, &mut rusqlite::Rows<'_>) -> Result<usize>;
pub type ReportFn = fn(&ReportContext<'_>, &FetchedRow) -> Result<Option<String>>;

/// Correction applied to a rule in the to-fix set
#[derive(Debug, Clone, Copy)]
pub enum FixStrategy {
    /// One idempotent statement, scoped to the offending window
    BlindQuery(&'static str),
    /// Re-query the rows needing correction and fix them one at a time
    RowCallback {
        fetch_sql: &'static str,
        columns: &'static [&'static str],
        apply: RowFixFn,
    },
    /// Gather one column over every offending row, then apply one set-based fix
    BatchCollect {
        key_column: &'static str,
        apply: BatchFixFn,
    },
    /// Hand the streaming result to a callback that owns iteration
    CursorStream {
        fetch_sql: &'static str,
        apply: StreamFixFn,
    },
}

impl FixStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            FixStrategy::BlindQuery(_) => "blind_query",
            FixStrategy::RowCallback { .. } => "row_callback",
            FixStrategy::BatchCollect { .. } => "batch_collect",
            FixStrategy::CursorStream { .. } => "cursor_stream",
        }
    }
}

/// Read-only handles available to detect-mode reporters
pub struct ReportContext<'a> {
    pub conn: &'a Connection,
    pub localizer: &'a dyn Localizer,
    pub tokenizer: &'a dyn Tokenizer,
}

/// Detect-mode rendering of a fired rule
#[derive(Debug, Clone, Copy)]
pub enum Reporter {
    /// Localized template filled with the listed column values
    /// (a Count check fills `{0}` with the count)
    Template {
        key: &'static str,
        args: &'static [usize],
    },
    /// Custom rendering; `None` marks the row as a false positive
    Function(ReportFn),
}

#[derive(Debug, Clone)]
pub struct RuleDefinition {
    pub id: RuleId,
    pub check_sql: &'static str,
    pub check: CheckKind,
    pub chunk: Option<ChunkSpec>,
    pub fix: FixStrategy,
    pub report: Option<Reporter>,
    pub cascades_to: &'static [RuleId],
}

impl RuleDefinition {
    pub fn shape(&self) -> RowShape<'static> {
        RowShape {
            rule: self.id,
            columns: self.check.columns(),
        }
    }

    /// Index of `name` in the check query's declared columns
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.check.columns().iter().position(|c| *c == name)
    }

    /// BatchCollect rules sweep unchunked while fixing
    pub fn fixes_unchunked(&self) -> bool {
        matches!(self.fix, FixStrategy::BatchCollect { .. })
    }
}

/// Ordered, validated rule list
#[derive(Debug, Clone)]
pub struct Catalog {
    rules: Vec<RuleDefinition>,
    fingerprint: String,
}

impl Catalog {
    pub fn new(rules: Vec<RuleDefinition>) -> Result<Self> {
        validate(&rules)?;
        let fingerprint = compute_fingerprint(&rules);
        Ok(Self { rules, fingerprint })
    }

    /// The built-in forum catalog
    pub fn standard() -> Result<Self> {
        Self::new(standard_rules())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RuleDefinition> {
        self.rules.get(index)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.rules.iter().position(|r| r.id == id)
    }

    pub fn rule(&self, id: &str) -> Option<&RuleDefinition> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuleDefinition> {
        self.rules.iter()
    }

    pub fn ids(&self) -> Vec<RuleId> {
        self.rules.iter().map(|r| r.id).collect()
    }

    /// SHA-256 over the ordered rule ids
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Fail on ids that are not in the catalog
    pub fn check_known<'a, I>(&self, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a String>,
    {
        for id in ids {
            if self.position(id).is_none() {
                return Err(RepairError::InvalidState(format!("unknown rule {id}")));
            }
        }
        Ok(())
    }
}

fn compute_fingerprint(rules: &[RuleDefinition]) -> String {
    let mut hasher = Sha256::new();
    for rule in rules {
        hasher.update(rule.id.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

fn validate(rules: &[RuleDefinition]) -> Result<()> {
    let mut seen = HashSet::new();
    for rule in rules {
        if rule.id.is_empty() {
            return Err(RepairError::Catalog("rule with empty id".to_string()));
        }
        if !seen.insert(rule.id) {
            return Err(RepairError::Catalog(format!("duplicate rule id {}", rule.id)));
        }
    }

    for rule in rules {
        for target in rule.cascades_to {
            if *target == rule.id {
                return Err(RepairError::Catalog(format!("{} cascades to itself", rule.id)));
            }
            if !seen.contains(target) {
                return Err(RepairError::Catalog(format!(
                    "{} cascades to unknown rule {target}",
                    rule.id
                )));
            }
        }

        if let Some(chunk) = &rule.chunk {
            if chunk.step < 1 {
                return Err(RepairError::Catalog(format!(
                    "{} has chunk step {}",
                    rule.id, chunk.step
                )));
            }
        }

        let is_row_set = matches!(rule.check, CheckKind::RowSet { .. });
        if let FixStrategy::BatchCollect { key_column, .. } = rule.fix {
            if !is_row_set || rule.column_index(key_column).is_none() {
                return Err(RepairError::Catalog(format!(
                    "{} collects column {key_column} its check does not return",
                    rule.id
                )));
            }
        }

        match rule.report {
            Some(Reporter::Template { args, .. }) if is_row_set => {
                let width = rule.check.columns().len();
                if let Some(bad) = args.iter().find(|a| **a >= width) {
                    return Err(RepairError::Catalog(format!(
                        "{} renders column {bad} of a {width}-column row",
                        rule.id
                    )));
                }
            }
            Some(Reporter::Function(_)) if !is_row_set => {
                return Err(RepairError::Catalog(format!(
                    "{} has a row reporter on a count check",
                    rule.id
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delete_nothing(_: &mut FixContext<'_>, _: &[i64]) -> Result<usize> {
        Ok(0)
    }

    fn rule(id: RuleId, cascades_to: &'static [RuleId]) -> RuleDefinition {
        RuleDefinition {
            id,
            check_sql: "SELECT COUNT(*) FROM topics",
            check: CheckKind::Count,
            chunk: None,
            fix: FixStrategy::BlindQuery("DELETE FROM topics WHERE 0"),
            report: None,
            cascades_to,
        }
    }

    #[test]
    fn test_standard_catalog_is_valid() {
        let catalog = Catalog::standard().unwrap();
        assert_eq!(catalog.len(), 32);
        assert_eq!(catalog.get(0).unwrap().id, "zero_topics");
        assert!(
            catalog.position("missing_topic_for_message").unwrap()
                < catalog.position("stats_topics").unwrap()
        );
        assert_eq!(catalog.fingerprint().len(), 64);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = Catalog::new(vec![rule("a", &[]), rule("a", &[])]).unwrap_err();
        assert!(matches!(err, RepairError::Catalog(_)));
    }

    #[test]
    fn test_dangling_and_self_cascades_rejected() {
        assert!(Catalog::new(vec![rule("a", &["b"])]).is_err());
        assert!(Catalog::new(vec![rule("a", &["a"])]).is_err());
        assert!(Catalog::new(vec![rule("a", &["b"]), rule("b", &[])]).is_ok());
    }

    #[test]
    fn test_batch_collect_needs_declared_key() {
        let mut bad = rule("a", &[]);
        bad.fix = FixStrategy::BatchCollect {
            key_column: "id_topic",
            apply: delete_nothing,
        };
        assert!(Catalog::new(vec![bad.clone()]).is_err());

        bad.check = CheckKind::RowSet {
            columns: &["id_topic"],
        };
        assert!(Catalog::new(vec![bad]).is_ok());
    }

    #[test]
    fn test_fingerprint_tracks_order() {
        let ab = Catalog::new(vec![rule("a", &[]), rule("b", &[])]).unwrap();
        let ba = Catalog::new(vec![rule("b", &[]), rule("a", &[])]).unwrap();
        assert_ne!(ab.fingerprint(), ba.fingerprint());
    }
}
