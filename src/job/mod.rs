mod category;
mod outcome;
mod state;

pub use category::{JobCategory, JobKind};
pub use outcome::{JobOutcome, OutcomeStatus, Severity};
pub use state::{RunContext, RunState};
