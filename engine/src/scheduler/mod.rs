// Scheduler module for due-task detection and firing

pub mod engine;

pub use engine::{Scheduler, SchedulerConfig, SchedulerEngine};
