//! Stage graph execution with per-thread serialisation and checkpointing.

pub mod engine;
pub mod locks;

pub use engine::{PipelineError, RunContext, Stage, WorkflowEngine, WorkflowSettings};
pub use locks::ThreadLocks;
