// Workflow tasks: dependency graph validation and child orchestration

pub mod graph;
pub mod orchestrator;

pub use graph::WorkflowGraph;
pub use orchestrator::{ChildFailure, WorkflowBody, WorkflowSummary};
