//! `queue` crate — the cron-like deferred task facility.
//!
//! Tasks are one-off: each is scheduled for a point in time, runs at most
//! once on or after that time, and can be cancelled by id until it runs.
//! There is no promptness guarantee; a task runs whenever a
//! [`CronRunner`] next polls after its `run_at`.

pub mod error;
pub mod scheduler;
pub mod runner;

pub use error::QueueError;
pub use scheduler::{ScheduledTask, TaskQueue};
pub use runner::{CronRunner, RunSummary, TaskHandler};
