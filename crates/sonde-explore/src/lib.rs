//! Property-gated exploration loop driving an on-device fuzzing agent.

pub mod background;
pub mod block;
pub mod budget;
pub mod config;
pub mod device;
pub mod engine;
pub mod property;
pub mod results;
pub mod select;

pub use engine::{EngineError, ExplorationEngine, RunSummary};
