//! Run-level wiring: options, logging, the run manifest and the session
//! that ties the device, the agent and the exploration loop together.

pub mod config;
pub mod manifest;
pub mod session;
pub mod telemetry;

pub use config::{ConfigError, RunOptions, RunPaths};
pub use session::{ExplorationSession, SessionError};
