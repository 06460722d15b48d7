use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Port the agent's control server listens on, device side.
pub const AGENT_DEVICE_PORT: u16 = 8090;

/// Process name used to find a stale agent before launching.
pub const AGENT_PROCESS_NAME: &str = "com.android.commands.monkey";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub device_port: u16,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
    /// Applied to every control call.
    pub call_retry: RetryPolicy,
    /// Applied to the liveness probe after launch.
    pub health_retry: RetryPolicy,
    /// Settle time before each hierarchy dump.
    pub throttle_ms: u64,
    /// Directory holding the agent jars and native libraries.
    pub assets_dir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            device_port: AGENT_DEVICE_PORT,
            request_timeout_secs: 10,
            call_retry: RetryPolicy::new(2, 2_000),
            health_retry: RetryPolicy::new(10, 2_000),
            throttle_ms: 200,
            assets_dir: PathBuf::from("assets"),
        }
    }
}

impl AgentConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}
