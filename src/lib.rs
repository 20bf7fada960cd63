//! Forum data-integrity repair engine
//!
//! This library finds and fixes broken references and stale counters in a
//! forum database without one long-running transaction:
//! - Declarative rule catalog with four fix strategies
//! - Chunked scanning over unbounded id-spaces
//! - Resumable runs: each invocation is one bounded burst of work
//! - Cascading corrections between rules
//! - Orphaned content is moved into salvage containers instead of deleted

pub mod catalog;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod error;
pub mod locale;
pub mod recovery;
pub mod report;
pub mod scanner;
pub mod schema;
pub mod store;
pub mod tokenizer;
pub mod types;

// Re-export commonly used types
pub use catalog::{Applied, Catalog, CheckKind, ChunkSpec, FixStrategy, Reporter, RuleDefinition};
pub use checkpoint::{Checkpoint, FileStateStore, MemoryStateStore, StateStore};
pub use config::RepairConfig;
pub use error::{RepairError, Result};
pub use locale::{Localizer, MessageCatalog};
pub use recovery::{FixContext, FixDispatcher, SalvageContainer, SalvageContext};
pub use report::{RepairReport, ReportWriter};
pub use scanner::{ChunkPlan, ChunkWindow, ScanDriver};
pub use store::FetchedRow;
pub use tokenizer::{Tokenizer, WordTokenizer};
pub use types::{Completion, PauseReason, Progress, RunState, ScanMode, StepOutcome};
