// Scheduler module: cron-driven daemon loop for scheduled runs

pub mod engine;

pub use engine::{Scheduler, SchedulerEngine};
