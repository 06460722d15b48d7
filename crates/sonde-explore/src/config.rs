use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exploration loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorationConfig {
    /// Packages stopped on an app restart.
    pub packages: Vec<String>,
    /// Fuzz steps to issue; unbounded when unset.
    pub max_steps: Option<u64>,
    /// Wall-clock budget; unbounded when unset.
    pub running_minutes: Option<f64>,
    /// Request an artifact sync every this many steps.
    pub profile_period: u64,
    /// Restart the app under test every this many steps.
    pub restart_app_period: Option<u64>,
    /// Pause after stopping the apps, before telling the agent.
    pub restart_settle_ms: u64,
    /// Fixed seed for the property selection.
    pub seed: Option<u64>,
    /// Where hierarchies that fail occlusion annotation are written.
    pub diagnostics_dir: Option<PathBuf>,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            packages: Vec::new(),
            max_steps: None,
            running_minutes: None,
            profile_period: 25,
            restart_app_period: None,
            restart_settle_ms: 3000,
            seed: None,
            diagnostics_dir: None,
        }
    }
}

impl ExplorationConfig {
    pub fn running_time(&self) -> Option<Duration> {
        self.running_minutes
            .map(|m| Duration::from_secs_f64((m * 60.0).max(0.0)))
    }

    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }

    /// Whether `steps_count` falls on a restart boundary.
    pub fn restart_due(&self, steps_count: u64) -> bool {
        match self.restart_app_period {
            Some(period) if period > 0 => steps_count != 0 && steps_count % period == 0,
            _ => false,
        }
    }

    /// Whether `steps_count` falls on an artifact sync boundary.
    pub fn profile_due(&self, steps_count: u64) -> bool {
        self.profile_period > 0 && steps_count % self.profile_period == 0
    }
}
