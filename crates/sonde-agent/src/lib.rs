//! Lifecycle and control-plane client for the on-device fuzzing agent.

pub mod api;
pub mod client;
pub mod config;
pub mod launch;
pub mod proxy;
pub mod retry;

pub use api::{AgentError, FuzzAgent};
pub use proxy::AgentProxy;
