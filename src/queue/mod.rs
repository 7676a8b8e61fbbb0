mod ledger;
mod progress;

pub use ledger::{QueueStatus, RunState};
pub use progress::ProgressReporter;

pub(crate) use ledger::{collect_results, RunSummary, TaskLedger};
pub(crate) use progress::ProgressBroadcaster;
