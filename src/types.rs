use serde::{Deserialize, Serialize};

/// Stable identifier of a rule in the catalog
pub type RuleId = &'static str;

/// What a scan invocation does when a rule fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Report problems and collect the to-fix set
    Detect,
    /// Correct the rules named in the to-fix set
    Fix,
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanMode::Detect => write!(f, "detect"),
            ScanMode::Fix => write!(f, "fix"),
        }
    }
}

/// Resumable state of one scan run, persisted at every pause
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    /// Index of the rule being processed
    pub rule_cursor: usize,
    /// Low bound of the next chunk window; 0 means the rule has not started
    pub chunk_cursor: i64,
    /// Rules selected for correction, in the order they were selected
    pub to_fix: Vec<String>,
    /// Rendered detect-mode messages
    pub diagnostics: Vec<String>,
    /// Fix pass number, starting at 0
    #[serde(default)]
    pub pass: u32,
    /// Rules corrected so far by a fix run
    #[serde(default)]
    pub fixed: Vec<String>,
    /// Invocations the run has started, the current one included
    #[serde(default)]
    pub invocations: u32,
    /// Statements issued by the current invocation
    #[serde(skip)]
    pub queries_executed: u64,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initial state of a fix run over an operator-approved set
    pub fn for_fix<I, S>(to_fix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = Self::new();
        for id in to_fix {
            state.mark(&id.into());
        }
        state
    }

    pub fn is_marked(&self, id: &str) -> bool {
        self.to_fix.iter().any(|marked| marked == id)
    }

    /// Add a rule to the to-fix set; returns false if it was already there
    pub fn mark(&mut self, id: &str) -> bool {
        if self.is_marked(id) {
            return false;
        }
        self.to_fix.push(id.to_string());
        true
    }

    pub fn unmark(&mut self, id: &str) {
        self.to_fix.retain(|marked| marked != id);
    }

    /// Move the cursor past the current rule
    pub fn advance_rule(&mut self) {
        self.rule_cursor += 1;
        self.chunk_cursor = 0;
    }
}

/// Why an invocation yielded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// Hard wall-clock threshold reached
    WallClock,
    /// Statement ceiling reached
    QueryCeiling,
    /// Soft threshold reached with chunks still left in the current rule
    ChunkBudget,
}

impl std::fmt::Display for PauseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PauseReason::WallClock => write!(f, "time limit"),
            PauseReason::QueryCeiling => write!(f, "query limit"),
            PauseReason::ChunkBudget => write!(f, "chunk time limit"),
        }
    }
}

/// Progress report handed to the host when an invocation pauses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub percent_complete: f64,
    pub current_rule: String,
    pub reason: PauseReason,
    pub diagnostics: Vec<String>,
    /// State to pass back into the next invocation
    pub state: RunState,
}

/// Final result of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Completion {
    Detect {
        to_fix: Vec<String>,
        diagnostics: Vec<String>,
    },
    Fix {
        fixed: Vec<String>,
        /// Cascaded rules still pending after the last allowed pass
        unresolved: Vec<String>,
    },
}

/// Result of one bounded invocation
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Paused(Progress),
    Done(Completion),
}

impl StepOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, StepOutcome::Done(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_is_deduplicated_and_ordered() {
        let mut state = RunState::new();
        assert!(state.mark("stats_topics"));
        assert!(state.mark("missing_boards"));
        assert!(!state.mark("stats_topics"));
        assert_eq!(state.to_fix, vec!["stats_topics", "missing_boards"]);

        state.unmark("stats_topics");
        assert_eq!(state.to_fix, vec!["missing_boards"]);
    }

    #[test]
    fn test_query_counter_is_not_persisted() {
        let mut state = RunState::for_fix(["missing_posters"]);
        state.queries_executed = 42;
        state.chunk_cursor = 501;

        let json = serde_json::to_string(&state).unwrap();
        assert!(!json.contains("queries_executed"));

        let restored: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.queries_executed, 0);
        assert_eq!(restored.chunk_cursor, 501);
        assert_eq!(restored.to_fix, vec!["missing_posters"]);
    }
}
