//! Bodies of the background loops driven by the [`Scheduler`](crate::scheduler::Scheduler).

mod prune_history;
mod run_checks;
mod schedule_checks;

pub use prune_history::prune_history_task;
pub use run_checks::run_checks_task;
pub use schedule_checks::schedule_checks_task;
