//! Process-level supervision of every controller loop.

mod supervisor;

pub use supervisor::{Orchestrator, OrchestratorBuilder};
