pub mod dispatcher;
pub mod salvage;

pub use dispatcher::{FixContext, FixDispatcher, FixOutcome, Issue};
pub use salvage::{SalvageContainer, SalvageContext, SalvageNames};
