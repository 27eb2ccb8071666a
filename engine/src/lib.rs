// Task scheduling and execution engine shared by the scheduler and API binaries

pub mod bootstrap;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod errors;
pub mod models;
pub mod retry;
pub mod runner;
pub mod schedule;
pub mod scheduler;
pub mod service;
pub mod telemetry;
pub mod workflow;

pub use errors::{EngineError, EngineResult, ErrorKind};
pub use service::TaskService;
