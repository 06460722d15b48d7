//! Client for the host-side device daemon.
//!
//! Requests use the daemon's smart-socket protocol: a 4-hex-digit
//! length followed by the request text, answered by `OKAY` or by `FAIL`
//! plus a length-prefixed message. Device-scoped requests first switch
//! the connection onto the device transport.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::AdbConfig;
use crate::line::wrap_command;
use crate::session::{ShellProtocol, ShellSession, Sink};

const SHELL_V2_FEATURE: &str = "shell_v2";

// ── Errors ───────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("device daemon I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("device daemon rejected `{request}`: {message}")]
    Rejected { request: String, message: String },
    #[error("malformed daemon reply: {0}")]
    Protocol(String),
    #[error("no device connected")]
    NoDevice,
    #[error("{count} devices connected, a serial or transport id is required")]
    AmbiguousDevice { count: usize },
    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("`{command}` timed out after {secs}s")]
    CommandTimeout { command: String, secs: u64 },
}

pub type Result<T> = std::result::Result<T, TransportError>;

// ── Wire helpers ─────────────────────────────────────────────────────

struct Connection {
    stream: TcpStream,
}

impl Connection {
    fn open(config: &AdbConfig, timeout: Option<Duration>) -> Result<Self> {
        let stream = TcpStream::connect(config.server_addr())?;
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(Some(config.socket_timeout()))?;
        Ok(Self { stream })
    }

    fn send(&mut self, request: &str) -> Result<()> {
        let framed = format!("{:04x}{}", request.len(), request);
        self.stream.write_all(framed.as_bytes())?;
        Ok(())
    }

    fn check_okay(&mut self, request: &str) -> Result<()> {
        let mut status = [0u8; 4];
        self.stream.read_exact(&mut status)?;
        match &status {
            b"OKAY" => Ok(()),
            b"FAIL" => {
                let message = self.read_prefixed()?;
                Err(TransportError::Rejected {
                    request: request.to_string(),
                    message,
                })
            }
            other => Err(TransportError::Protocol(format!(
                "unexpected status {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    fn request(&mut self, request: &str) -> Result<()> {
        self.send(request)?;
        self.check_okay(request)
    }

    fn read_prefixed(&mut self) -> Result<String> {
        let mut len_hex = [0u8; 4];
        self.stream.read_exact(&mut len_hex)?;
        let text = std::str::from_utf8(&len_hex)
            .map_err(|_| TransportError::Protocol("non-ascii length prefix".into()))?;
        let len = usize::from_str_radix(text, 16)
            .map_err(|_| TransportError::Protocol(format!("bad length prefix {text:?}")))?;
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body)?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    fn read_to_string(mut self) -> Result<String> {
        let mut out = Vec::new();
        self.stream.read_to_end(&mut out)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

// ── Device selection ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceTarget {
    Serial(String),
    TransportId(u64),
}

impl DeviceTarget {
    fn transport_request(&self) -> String {
        match self {
            DeviceTarget::Serial(s) => format!("host:transport:{s}"),
            DeviceTarget::TransportId(id) => format!("host:transport-id:{id}"),
        }
    }

    fn host_prefix(&self) -> String {
        match self {
            DeviceTarget::Serial(s) => format!("host-serial:{s}"),
            DeviceTarget::TransportId(id) => format!("host-transport-id:{id}"),
        }
    }

    fn cli_args(&self) -> Vec<String> {
        match self {
            DeviceTarget::Serial(s) => vec!["-s".into(), s.clone()],
            DeviceTarget::TransportId(id) => vec!["-t".into(), id.to_string()],
        }
    }
}

/// Serials of attached devices in the `device` state.
pub fn list_devices(config: &AdbConfig) -> Result<Vec<String>> {
    let mut conn = Connection::open(config, Some(config.socket_timeout()))?;
    conn.request("host:devices")?;
    let listing = conn.read_prefixed()?;
    Ok(parse_device_list(&listing))
}

pub fn parse_device_list(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            (parts.next() == Some("device")).then(|| serial.to_string())
        })
        .collect()
}

// ── Device handle ────────────────────────────────────────────────────

/// A handle to one attached device. Cheap to clone; every operation
/// opens its own daemon connection.
#[derive(Debug, Clone)]
pub struct AdbDevice {
    config: AdbConfig,
    target: DeviceTarget,
}

impl AdbDevice {
    pub fn new(config: AdbConfig, target: DeviceTarget) -> Self {
        Self { config, target }
    }

    /// Resolve the device to talk to. Without an explicit serial or
    /// transport id exactly one device must be attached.
    pub fn resolve(
        config: AdbConfig,
        serial: Option<&str>,
        transport_id: Option<u64>,
    ) -> Result<Self> {
        let target = match (serial, transport_id) {
            (Some(s), _) => DeviceTarget::Serial(s.to_string()),
            (None, Some(id)) => DeviceTarget::TransportId(id),
            (None, None) => {
                let mut devices = list_devices(&config)?;
                match devices.len() {
                    0 => return Err(TransportError::NoDevice),
                    1 => DeviceTarget::Serial(devices.remove(0)),
                    count => return Err(TransportError::AmbiguousDevice { count }),
                }
            }
        };
        Ok(Self::new(config, target))
    }

    pub fn target(&self) -> &DeviceTarget {
        &self.target
    }

    pub fn config(&self) -> &AdbConfig {
        &self.config
    }

    fn open_transport(&self, timeout: Option<Duration>) -> Result<Connection> {
        let mut conn = Connection::open(&self.config, timeout)?;
        conn.request(&self.target.transport_request())?;
        Ok(conn)
    }

    /// Feature strings advertised by the device.
    pub fn features(&self) -> Result<Vec<String>> {
        let mut conn = Connection::open(&self.config, Some(self.config.socket_timeout()))?;
        conn.request(&format!("{}:features", self.target.host_prefix()))?;
        let body = conn.read_prefixed()?;
        Ok(body
            .split(',')
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect())
    }

    pub fn shell_protocol(&self) -> Result<ShellProtocol> {
        if self.features()?.iter().any(|f| f == SHELL_V2_FEATURE) {
            Ok(ShellProtocol::Framed)
        } else {
            tracing::warn!("device lacks framed shell support, stderr is merged into stdout");
            Ok(ShellProtocol::Line)
        }
    }

    /// Run a short command and collect its output.
    pub fn shell(&self, command: &str) -> Result<String> {
        let mut conn = self.open_transport(Some(self.config.socket_timeout()))?;
        conn.request(&format!("shell:{command}"))?;
        conn.read_to_string()
    }

    /// Start `command` in the background, streaming its output into the
    /// given sinks. Returns as soon as the device accepted the command.
    pub fn stream_shell(
        &self,
        command: &str,
        stdout: Sink,
        stderr: Sink,
        timeout: Option<Duration>,
    ) -> Result<ShellSession> {
        let protocol = self.shell_protocol()?;
        let mut conn = self.open_transport(timeout)?;
        match protocol {
            ShellProtocol::Framed => conn.request(&format!("shell,v2:{command}"))?,
            ShellProtocol::Line => conn.request(&format!("shell:{}", wrap_command(command)))?,
        }
        tracing::debug!(?protocol, command, "shell session opened");
        Ok(ShellSession::spawn(conn.stream, protocol, stdout, stderr))
    }

    pub fn getprop(&self, key: &str) -> Result<String> {
        Ok(self.shell(&format!("getprop {key}"))?.trim().to_string())
    }

    /// Major platform release, e.g. `13` for "13" or `7` for "7.1.2".
    pub fn android_release(&self) -> Result<Option<u32>> {
        Ok(parse_release(&self.getprop("ro.build.version.release")?))
    }

    pub fn list_packages(&self) -> Result<Vec<String>> {
        Ok(parse_package_list(&self.shell("pm list packages")?))
    }

    pub fn app_stop(&self, package: &str) -> Result<()> {
        self.shell(&format!("am force-stop {package}"))?;
        Ok(())
    }

    /// Kill the first process whose `ps` line mentions `name`.
    pub fn kill_proc(&self, name: &str) -> Result<bool> {
        let listing = self.shell("ps -ef")?;
        match find_pid(&listing, name) {
            Some(pid) => {
                tracing::info!(process = name, pid, "stale process running, killing it");
                self.shell(&format!("kill {pid}"))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ── Port forwarding ──────────────────────────────────────────────

    /// Local ports already forwarded to `tcp:<remote>` on this device.
    pub fn list_forwards(&self) -> Result<Vec<(u16, u16)>> {
        let mut conn = Connection::open(&self.config, Some(self.config.socket_timeout()))?;
        conn.request(&format!("{}:list-forward", self.target.host_prefix()))?;
        let body = conn.read_prefixed()?;
        let serial = match &self.target {
            DeviceTarget::Serial(s) => Some(s.as_str()),
            DeviceTarget::TransportId(_) => None,
        };
        Ok(parse_forward_list(&body, serial))
    }

    pub fn forward(&self, local: u16, remote: u16) -> Result<()> {
        let request = format!(
            "{}:forward:tcp:{local};tcp:{remote}",
            self.target.host_prefix()
        );
        let mut conn = Connection::open(&self.config, Some(self.config.socket_timeout()))?;
        conn.request(&request)
    }

    /// Reuse a forward to `remote` if one exists, otherwise create one on
    /// a free local port.
    pub fn forward_port(&self, remote: u16) -> Result<u16> {
        if let Some((local, _)) = self.list_forwards()?.into_iter().find(|(_, r)| *r == remote) {
            return Ok(local);
        }
        let local = free_local_port()?;
        self.forward(local, remote)?;
        Ok(local)
    }

    pub fn remove_forward(&self, local: u16) -> Result<()> {
        let request = format!("{}:killforward:tcp:{local}", self.target.host_prefix());
        let mut conn = Connection::open(&self.config, Some(self.config.socket_timeout()))?;
        conn.request(&request)
    }

    // ── File transfer ────────────────────────────────────────────────

    pub fn push(&self, local: &Path, remote: &str) -> Result<()> {
        let local = local.to_string_lossy().into_owned();
        self.run_host_command(&["push", &local, remote])
    }

    /// Copy the contents of a device directory into `local`.
    pub fn pull_dir(&self, remote: &str, local: &Path) -> Result<()> {
        std::fs::create_dir_all(local)?;
        let source = format!("{}/.", remote.trim_end_matches('/'));
        let dest = local.to_string_lossy().into_owned();
        self.run_host_command(&["pull", &source, &dest])
    }

    fn run_host_command(&self, args: &[&str]) -> Result<()> {
        let mut command = Command::new(&self.config.adb_path);
        command
            .args(self.target.cli_args())
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let rendered = format!("adb {}", args.join(" "));
        tracing::debug!(command = %rendered, "running host command");

        let mut child = command.spawn()?;
        let stderr = child.stderr.take().and_then(drain_to_string);
        let deadline = Instant::now() + self.config.command_timeout();
        loop {
            if let Some(status) = child.try_wait()? {
                if status.success() {
                    return Ok(());
                }
                let stderr = stderr
                    .and_then(|reader| reader.join().ok())
                    .unwrap_or_default();
                return Err(TransportError::CommandFailed {
                    command: rendered,
                    status: status.to_string(),
                    stderr: stderr.trim().to_string(),
                });
            }
            if Instant::now() >= deadline {
                child.kill()?;
                child.wait()?;
                return Err(TransportError::CommandTimeout {
                    command: rendered,
                    secs: self.config.command_timeout_secs,
                });
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }
}

/// Read `pipe` to its end on a helper thread so the child never blocks
/// on a full pipe.
fn drain_to_string<R: Read + Send + 'static>(mut pipe: R) -> Option<JoinHandle<String>> {
    std::thread::Builder::new()
        .name("adb-stderr".into())
        .spawn(move || {
            let mut bytes = Vec::new();
            if let Err(e) = pipe.read_to_end(&mut bytes) {
                tracing::debug!(error = %e, "host command stderr unreadable");
            }
            String::from_utf8_lossy(&bytes).into_owned()
        })
        .map_err(|e| tracing::warn!(error = %e, "could not start stderr reader"))
        .ok()
}

fn free_local_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

// ── Reply parsing ────────────────────────────────────────────────────

pub fn parse_package_list(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|l| l.trim().strip_prefix("package:"))
        .map(str::to_string)
        .collect()
}

pub fn find_pid(ps_listing: &str, name: &str) -> Option<u32> {
    ps_listing
        .lines()
        .filter(|l| l.contains(name))
        .find_map(|l| l.split_whitespace().nth(1)?.parse().ok())
}

pub fn parse_release(release: &str) -> Option<u32> {
    release.trim().split('.').next()?.parse().ok()
}

/// Parse `list-forward` output into `(local, remote)` tcp port pairs,
/// keeping only entries of `serial` when given.
pub fn parse_forward_list(listing: &str, serial: Option<&str>) -> Vec<(u16, u16)> {
    listing
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let owner = parts.next()?;
            if serial.is_some_and(|s| s != owner) {
                return None;
            }
            let local = parts.next()?.strip_prefix("tcp:")?.parse().ok()?;
            let remote = parts.next()?.strip_prefix("tcp:")?.parse().ok()?;
            Some((local, remote))
        })
        .collect()
}
