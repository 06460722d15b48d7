use std::fs::File;
use std::path::Path;

use sonde_transport::{AdbDevice, ShellSession};

use crate::api::{AgentError, FuzzAgent, InitRequest, ScriptLogEntry, StepRequest};
use crate::client::{parse_output_dir, AgentClient};
use crate::config::{AgentConfig, AGENT_PROCESS_NAME};
use crate::launch::{artifact_pushes, LaunchSpec};

/// Platform release below which the agent's exit status is not reliable.
const RELIABLE_EXIT_RELEASE: u32 = 7;

/// Owns the agent process on one device and its control connection.
pub struct AgentProxy {
    device: AdbDevice,
    config: AgentConfig,
    client: Option<AgentClient>,
    local_port: Option<u16>,
    session: Option<ShellSession>,
    device_output_dir: Option<String>,
    android_release: Option<u32>,
}

impl AgentProxy {
    pub fn new(device: AdbDevice, config: AgentConfig) -> Self {
        Self {
            device,
            config,
            client: None,
            local_port: None,
            session: None,
            device_output_dir: None,
            android_release: None,
        }
    }

    pub fn device(&self) -> &AdbDevice {
        &self.device
    }

    pub fn device_output_dir(&self) -> Option<&str> {
        self.device_output_dir.as_deref()
    }

    /// Kill any stale agent, push its artifacts and launch it. Agent
    /// output, stdout and stderr alike, is streamed into `log_file`.
    pub fn start(&mut self, spec: &LaunchSpec, log_file: &Path) -> Result<(), AgentError> {
        self.android_release = self.device.android_release()?;
        self.device.kill_proc(AGENT_PROCESS_NAME)?;

        tracing::info!("pushing agent artifacts to device");
        for (local, remote) in artifact_pushes(&self.config.assets_dir, spec.activity_filter.as_ref()) {
            self.device.push(&local, &remote)?;
        }

        let out = File::create(log_file)?;
        let err = out.try_clone()?;
        let command = spec.command_line();
        tracing::info!(%command, log = %log_file.display(), "launching agent");
        let session = self
            .device
            .stream_shell(&command, Box::new(out), Box::new(err), None)?;
        self.session = Some(session);
        Ok(())
    }

    /// Forward the control port and poll `/ping` until the agent answers.
    pub fn check_alive(&mut self) -> Result<(), AgentError> {
        let local = self.device.forward_port(self.config.device_port)?;
        let client = AgentClient::new(local, self.config.request_timeout());
        tracing::info!(local_port = local, "connecting to agent");

        let policy = self.config.health_retry;
        policy
            .run("ping", || client.get("/ping"))
            .map_err(|_| AgentError::Unreachable {
                attempts: policy.attempts,
            })?;
        tracing::info!("agent is up");

        self.local_port = Some(local);
        self.client = Some(client);
        Ok(())
    }

    /// Send the per-run configuration and remember the device output
    /// directory the agent reports back.
    pub fn init(&mut self, request: &InitRequest) -> Result<String, AgentError> {
        let client = self.client()?;
        let dir = self.config.call_retry.run("init", || {
            let body = client.post_json("/init", request)?;
            parse_output_dir(&body).ok_or_else(|| AgentError::Malformed {
                path: "/init".into(),
                reason: format!("no outputDir in {body:?}"),
            })
        })?;
        tracing::info!(output_dir = %dir, "agent initialised");
        self.device_output_dir = Some(dir.clone());
        Ok(dir)
    }

    /// Drop the port forward. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.client = None;
        if let Some(port) = self.local_port.take() {
            if let Err(e) = self.device.remove_forward(port) {
                tracing::debug!(error = %e, port, "could not remove port forward");
            }
        }
    }

    fn client(&self) -> Result<&AgentClient, AgentError> {
        self.client.as_ref().ok_or(AgentError::NotStarted)
    }

    /// Exit status of an agent process that has already ended.
    fn finished_code(&self) -> Option<i32> {
        let code = self.session.as_ref().and_then(ShellSession::poll)?;
        Some(reported_exit_code(self.android_release, code))
    }

    /// Run a control call under the call retry policy. A failure while the
    /// agent process has already died non-zero is reported as such.
    fn call<T, F>(&self, label: &str, op: F) -> Result<T, AgentError>
    where
        F: FnMut() -> Result<T, AgentError>,
    {
        self.config.call_retry.run(label, op).map_err(|e| match self.finished_code() {
            Some(code) if code != 0 && e.is_disconnect() => AgentError::Exited { code },
            _ => e,
        })
    }
}

/// Old releases do not propagate the agent's status through the shell, so
/// any ending there counts as a clean exit.
fn reported_exit_code(android_release: Option<u32>, code: i32) -> i32 {
    match android_release {
        Some(r) if r < RELIABLE_EXIT_RELEASE => 0,
        _ => code,
    }
}

impl FuzzAgent for AgentProxy {
    fn step_monkey(&mut self, request: &StepRequest) -> Result<String, AgentError> {
        let client = self.client()?;
        self.call("stepMonkey", || client.post_for_result("/stepMonkey", request))
    }

    fn dump_hierarchy(&mut self) -> Result<String, AgentError> {
        let client = self.client()?;
        let throttle = self.config.throttle();
        self.call("dumpHierarchy", || {
            std::thread::sleep(throttle);
            client.get_result("/dumpHierarchy")
        })
    }

    fn stop_monkey(&mut self) -> Result<(), AgentError> {
        let client = self.client()?;
        let reply = self.call("stopMonkey", || client.get("/stopMonkey"))?;
        tracing::info!(reply = %reply.trim(), "agent stop requested");
        Ok(())
    }

    fn log_script(&mut self, entry: &ScriptLogEntry) -> Result<(), AgentError> {
        let client = self.client()?;
        let reply = self.call("logScript", || client.post_json("/logScript", entry))?;
        if reply.trim() != "OK" {
            tracing::error!(?entry, %reply, "agent refused script log entry");
        }
        Ok(())
    }

    fn send_info(&mut self, marker: &str) -> Result<(), AgentError> {
        let client = self.client()?;
        self.call("sendInfo", || client.post_json("/sendInfo", &marker))?;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.session.as_ref().is_some_and(ShellSession::is_running)
    }

    fn return_code(&mut self) -> Option<i32> {
        let release = self.android_release;
        let session = self.session.as_mut()?;
        if session.is_running() {
            tracing::info!("waiting for agent to exit");
        }
        Some(reported_exit_code(release, session.wait()))
    }
}

impl Drop for AgentProxy {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor};
    use std::net::TcpListener;

    use sonde_transport::config::AdbConfig;
    use sonde_transport::adb::DeviceTarget;
    use sonde_transport::ShellProtocol;

    use super::*;
    use crate::api::BlockList;
    use crate::retry::RetryPolicy;

    /// A proxy whose agent already ended by closing its line-variant
    /// shell without the exit sentinel, and whose control port is closed.
    fn ended_proxy(android_release: Option<u32>) -> AgentProxy {
        let mut session = ShellSession::spawn(
            Cursor::new(b"agent output\n".to_vec()),
            ShellProtocol::Line,
            Box::new(io::sink()),
            Box::new(io::sink()),
        );
        session.wait();

        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let config = AgentConfig {
            call_retry: RetryPolicy::new(1, 0),
            ..AgentConfig::default()
        };
        let mut proxy = AgentProxy::new(
            AdbDevice::new(AdbConfig::default(), DeviceTarget::Serial("emulator-5554".into())),
            config,
        );
        proxy.client = Some(AgentClient::new(port, proxy.config.request_timeout()));
        proxy.session = Some(session);
        proxy.android_release = android_release;
        proxy
    }

    fn step() -> StepRequest {
        StepRequest {
            block: BlockList::default(),
            steps_count: 1,
        }
    }

    #[test]
    fn test_old_release_ending_reads_as_clean_exit() {
        let mut proxy = ended_proxy(Some(6));
        let err = proxy.step_monkey(&step()).unwrap_err();
        assert!(err.is_disconnect(), "{err:?}");
        assert_eq!(proxy.return_code(), Some(0));
    }

    #[test]
    fn test_reliable_release_keeps_the_failure_code() {
        let mut proxy = ended_proxy(Some(9));
        let err = proxy.step_monkey(&step()).unwrap_err();
        assert!(matches!(err, AgentError::Exited { code: -1 }), "{err:?}");
        assert_eq!(proxy.return_code(), Some(-1));
    }

    #[test]
    fn test_reported_exit_code() {
        assert_eq!(reported_exit_code(Some(6), -1), 0);
        assert_eq!(reported_exit_code(Some(7), -1), -1);
        assert_eq!(reported_exit_code(None, 3), 3);
    }
}
