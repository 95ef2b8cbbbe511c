//! Persistent one-shot / interval / weekly schedules, fired once per minute.

pub mod db;
pub mod engine;
pub mod error;
pub mod types;

pub use engine::{CronStore, JobSink, SchedulerEngine};
pub use error::SchedulerError;
pub use types::{CronJob, JobAction, JobType, WeeklySchedule};
