//! Disk Replacement Workflow

pub mod orchestrator;
pub mod plan;

pub use orchestrator::{ReplaceOrchestrator, ReplaceRequest, StopOutcome};
pub use plan::{ReplaceStep, StepContext};
