//! 任务引擎 (Job Engine)

pub mod orchestrator;

pub use orchestrator::Orchestrator;
