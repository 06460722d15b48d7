use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_SERVER_PORT: u16 = 5037;
const SERVER_PORT_ENV: &str = "ANDROID_ADB_SERVER_PORT";

/// How to reach the host-side device daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdbConfig {
    pub host: String,
    pub port: u16,
    /// Host `adb` binary, used for file transfer.
    pub adb_path: PathBuf,
    /// Upper bound for one `adb push`/`adb pull` invocation.
    pub command_timeout_secs: u64,
    /// Socket timeout for short request/response exchanges.
    pub socket_timeout_secs: u64,
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_SERVER_PORT,
            adb_path: PathBuf::from("adb"),
            command_timeout_secs: 120,
            socket_timeout_secs: 30,
        }
    }
}

impl AdbConfig {
    /// Defaults, with the server port taken from the environment when set.
    pub fn from_env() -> Self {
        let port = std::env::var(SERVER_PORT_ENV)
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(DEFAULT_SERVER_PORT);
        Self {
            port,
            ..Self::default()
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_addr() {
        let cfg = AdbConfig::default();
        assert_eq!(cfg.server_addr(), "127.0.0.1:5037");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: AdbConfig = serde_json::from_str(r#"{"port": 5038}"#).unwrap();
        assert_eq!(cfg.port, 5038);
        assert_eq!(cfg.host, "127.0.0.1");
    }
}
