// Pipeline module: run state machine and the sequential stage runner

pub mod engine;
pub mod state;

pub use engine::PipelineEngine;
pub use state::is_valid_transition;
