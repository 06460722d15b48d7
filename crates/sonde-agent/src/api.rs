//! Control-plane surface of the on-device fuzzing agent.

use serde::{Deserialize, Serialize};

use sonde_transport::TransportError;

// ── Wire types ───────────────────────────────────────────────────────

/// Widgets the agent must not act on during the next step, as query
/// strings over the hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockList {
    pub block_widgets: Vec<String>,
    pub block_trees: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRequest {
    #[serde(flatten)]
    pub block: BlockList,
    pub steps_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    pub take_screenshots: bool,
    pub pre_failure_screenshots: u32,
    pub post_failure_screenshots: u32,
    pub log_stamp: String,
    pub device_output_root: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptState {
    Start,
    Pass,
    Fail,
    Error,
}

impl ScriptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptState::Start => "start",
            ScriptState::Pass => "pass",
            ScriptState::Fail => "fail",
            ScriptState::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptLogEntry {
    pub prop_name: String,
    pub start_steps_count: u64,
    pub state: ScriptState,
}

/// Body shape of `/stepMonkey` and `/dumpHierarchy` replies.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultEnvelope {
    pub result: String,
}

// ── Errors ───────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The control server could not be reached or dropped the connection.
    #[error("agent connection failed: {0}")]
    Disconnected(String),
    #[error("agent answered {path} with HTTP {status}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },
    #[error("unexpected reply from {path}: {reason}")]
    Malformed { path: String, reason: String },
    #[error("agent unreachable after {attempts} attempts")]
    Unreachable { attempts: u32 },
    #[error("agent process exited with code {code}")]
    Exited { code: i32 },
    #[error("agent has not been started")]
    NotStarted,
    #[error(transparent)]
    Device(#[from] TransportError),
    #[error("agent log file: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    pub fn is_disconnect(&self) -> bool {
        matches!(self, AgentError::Disconnected(_))
    }
}

// ── Agent seam ───────────────────────────────────────────────────────

/// Calls the exploration loop makes against a running agent.
pub trait FuzzAgent {
    /// Advance one fuzz event and return the hierarchy afterwards.
    fn step_monkey(&mut self, request: &StepRequest) -> Result<String, AgentError>;

    /// Current hierarchy without advancing the fuzzer.
    fn dump_hierarchy(&mut self) -> Result<String, AgentError>;

    fn stop_monkey(&mut self) -> Result<(), AgentError>;

    fn log_script(&mut self, entry: &ScriptLogEntry) -> Result<(), AgentError>;

    fn send_info(&mut self, marker: &str) -> Result<(), AgentError>;

    /// Whether the agent process is still running.
    fn is_running(&self) -> bool;

    /// Completion code of the agent process, waiting for it if it is
    /// still running. `None` when it was never started.
    fn return_code(&mut self) -> Option<i32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_request_shape() {
        let req = StepRequest {
            block: BlockList {
                block_widgets: vec![".//node[@text='Ads']".into()],
                block_trees: vec![],
            },
            steps_count: 12,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "block_widgets": [".//node[@text='Ads']"],
                "block_trees": [],
                "steps_count": 12
            })
        );
    }

    #[test]
    fn test_script_log_shape() {
        let entry = ScriptLogEntry {
            prop_name: "login.test_logout".into(),
            start_steps_count: 3,
            state: ScriptState::Start,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"propName": "login.test_logout", "startStepsCount": 3, "state": "start"})
        );
    }

    #[test]
    fn test_init_request_uses_camel_case() {
        let init = InitRequest {
            take_screenshots: true,
            pre_failure_screenshots: 3,
            post_failure_screenshots: 1,
            log_stamp: "s1".into(),
            device_output_root: "/sdcard".into(),
        };
        let json = serde_json::to_value(&init).unwrap();
        assert_eq!(json["takeScreenshots"], true);
        assert_eq!(json["preFailureScreenshots"], 3);
        assert_eq!(json["deviceOutputRoot"], "/sdcard");
    }

    #[test]
    fn test_only_connection_failures_are_disconnects() {
        assert!(AgentError::Disconnected("refused".into()).is_disconnect());
        assert!(!AgentError::NotStarted.is_disconnect());
        assert!(!AgentError::Status {
            path: "/x".into(),
            status: 500,
            body: String::new()
        }
        .is_disconnect());
    }
}
