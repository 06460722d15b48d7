//! Run options: the user-facing configuration of one exploration run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use sonde_agent::api::InitRequest;
use sonde_agent::launch::{ActivityFilter, ActivityFilterKind, LaunchSpec};
use sonde_explore::config::ExplorationConfig;

const STAMP_FORMAT: &str = "%Y%m%d%H_%M%S%6f";
const ILLEGAL_STAMP_CHARS: [char; 13] = [
    '/', '\\', ':', '*', '?', '"', '<', '>', '|', '\n', '\r', '\t', '\0',
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed run options: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("at least one target package is required")]
    NoPackages,

    #[error("an activity allow-list and deny-list cannot both be set")]
    ConflictingActivityFilters,

    #[error("pre_failure_screenshots is {pre} but take_screenshots is off")]
    ScreenshotsDisabled { pre: u32 },

    #[error("post_failure_screenshots ({post}) exceeds pre_failure_screenshots ({pre})")]
    PostExceedsPre { pre: u32, post: u32 },

    #[error("profile_period must be at least 1")]
    ProfilePeriod,

    #[error("restart_app_period must be at least 1")]
    RestartPeriod,

    #[error("running_minutes must be positive, got {0}")]
    RunningMinutes(f64),

    #[error("character {ch:?} is not allowed in the log stamp {stamp:?}")]
    IllegalStampChar { ch: char, stamp: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Apps under test.
    pub packages: Vec<String>,
    pub serial: Option<String>,
    pub transport_id: Option<u64>,
    pub max_steps: Option<u64>,
    pub running_minutes: f64,
    /// Agent throttle between actions, also the settle time before a dump.
    pub throttle_ms: u64,
    pub profile_period: u64,
    pub restart_app_period: Option<u64>,
    pub output_dir: PathBuf,
    /// Names the output files; the local time when unset.
    pub log_stamp: Option<String>,
    pub device_output_root: String,
    pub take_screenshots: bool,
    pub pre_failure_screenshots: u32,
    pub post_failure_screenshots: u32,
    /// Device path of the activity allow-list.
    pub act_whitelist_file: Option<String>,
    /// Device path of the activity deny-list.
    pub act_blacklist_file: Option<String>,
    /// Holds `awl.strings` and `abl.strings`.
    pub configs_dir: PathBuf,
    pub extra_agent_args: Vec<String>,
    pub assets_dir: PathBuf,
    pub seed: Option<u64>,
    pub debug: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            packages: Vec::new(),
            serial: None,
            transport_id: None,
            max_steps: None,
            running_minutes: 10.0,
            throttle_ms: 200,
            profile_period: 25,
            restart_app_period: None,
            output_dir: PathBuf::from("output"),
            log_stamp: None,
            device_output_root: "/sdcard".to_string(),
            take_screenshots: false,
            pre_failure_screenshots: 0,
            post_failure_screenshots: 0,
            act_whitelist_file: None,
            act_blacklist_file: None,
            configs_dir: PathBuf::from("configs"),
            extra_agent_args: Vec::new(),
            assets_dir: PathBuf::from("assets"),
            seed: None,
            debug: false,
        }
    }
}

impl RunOptions {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.packages.is_empty() {
            return Err(ConfigError::NoPackages);
        }
        if self.act_whitelist_file.is_some() && self.act_blacklist_file.is_some() {
            return Err(ConfigError::ConflictingActivityFilters);
        }
        if !self.take_screenshots && self.pre_failure_screenshots > 0 {
            return Err(ConfigError::ScreenshotsDisabled {
                pre: self.pre_failure_screenshots,
            });
        }
        if self.post_failure_screenshots > self.pre_failure_screenshots {
            return Err(ConfigError::PostExceedsPre {
                pre: self.pre_failure_screenshots,
                post: self.post_failure_screenshots,
            });
        }
        if self.profile_period < 1 {
            return Err(ConfigError::ProfilePeriod);
        }
        if self.restart_app_period == Some(0) {
            return Err(ConfigError::RestartPeriod);
        }
        if !(self.running_minutes.is_finite() && self.running_minutes > 0.0) {
            return Err(ConfigError::RunningMinutes(self.running_minutes));
        }
        if let Some(stamp) = &self.log_stamp {
            check_stamp(stamp)?;
        }
        Ok(())
    }

    /// The configured stamp, or one taken from the local clock.
    pub fn resolve_stamp(&self) -> String {
        self.log_stamp.clone().unwrap_or_else(now_stamp)
    }

    /// The activity list to push, with its host file under `configs_dir`.
    pub fn activity_filter(&self) -> Option<ActivityFilter> {
        let (kind, device_path, file) = match (&self.act_whitelist_file, &self.act_blacklist_file) {
            (Some(path), None) => (ActivityFilterKind::Allow, path, "awl.strings"),
            (None, Some(path)) => (ActivityFilterKind::Deny, path, "abl.strings"),
            _ => return None,
        };
        Some(ActivityFilter {
            kind,
            local_file: self.configs_dir.join(file),
            device_path: device_path.clone(),
        })
    }

    pub fn launch_spec(&self, stamp: &str) -> LaunchSpec {
        LaunchSpec {
            packages: self.packages.clone(),
            running_minutes: self.running_minutes.ceil() as u64,
            throttle_ms: self.throttle_ms,
            device_output_root: self.device_output_root.clone(),
            log_stamp: stamp.to_string(),
            profile_period: self.profile_period,
            activity_filter: self.activity_filter(),
            extra_args: self.extra_agent_args.clone(),
        }
    }

    pub fn init_request(&self, stamp: &str) -> InitRequest {
        InitRequest {
            take_screenshots: self.take_screenshots,
            pre_failure_screenshots: self.pre_failure_screenshots,
            post_failure_screenshots: self.post_failure_screenshots,
            log_stamp: stamp.to_string(),
            device_output_root: self.device_output_root.clone(),
        }
    }

    pub fn exploration_config(&self, diagnostics_dir: &Path) -> ExplorationConfig {
        ExplorationConfig {
            packages: self.packages.clone(),
            max_steps: self.max_steps,
            running_minutes: Some(self.running_minutes),
            profile_period: self.profile_period,
            restart_app_period: self.restart_app_period,
            seed: self.seed,
            diagnostics_dir: Some(diagnostics_dir.to_path_buf()),
            ..ExplorationConfig::default()
        }
    }
}

pub fn now_stamp() -> String {
    chrono::Local::now().format(STAMP_FORMAT).to_string()
}

fn check_stamp(stamp: &str) -> Result<(), ConfigError> {
    match stamp.chars().find(|c| ILLEGAL_STAMP_CHARS.contains(c)) {
        Some(ch) => Err(ConfigError::IllegalStampChar {
            ch,
            stamp: stamp.to_string(),
        }),
        None => Ok(()),
    }
}

// ── Output layout ────────────────────────────────────────────────────

/// Files written by one run, all derived from its stamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub stamp: String,
    pub output_dir: PathBuf,
    pub agent_log: PathBuf,
    pub counters_file: PathBuf,
    pub exec_log_file: PathBuf,
    pub manifest_file: PathBuf,
}

impl RunPaths {
    pub fn new(output_root: &Path, stamp: &str) -> Self {
        let output_dir = output_root.join(format!("res_{stamp}"));
        Self {
            stamp: stamp.to_string(),
            agent_log: output_dir.join(format!("fastbot_{stamp}.log")),
            counters_file: output_dir.join(format!("result_{stamp}.json")),
            exec_log_file: output_dir.join(format!("property_exec_info_{stamp}.json")),
            manifest_file: output_dir.join("bug_report_config.json"),
            output_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> RunOptions {
        RunOptions {
            packages: vec!["com.example.app".into()],
            ..RunOptions::default()
        }
    }

    #[test]
    fn test_defaults_are_valid_with_a_package() {
        assert!(valid().validate().is_ok());
        assert!(matches!(
            RunOptions::default().validate(),
            Err(ConfigError::NoPackages)
        ));
    }

    #[test]
    fn test_stamp_shape() {
        let stamp = now_stamp();
        // YYYYMMDDHH_MMSS + six fractional digits
        assert_eq!(stamp.len(), 10 + 1 + 4 + 6);
        assert_eq!(stamp.as_bytes()[10], b'_');
        assert!(check_stamp(&stamp).is_ok());
    }

    #[test]
    fn test_activity_filter_files() {
        let mut opts = valid();
        assert!(opts.activity_filter().is_none());
        opts.act_blacklist_file = Some("/sdcard/abl.strings".into());
        let filter = opts.activity_filter().unwrap();
        assert_eq!(filter.kind, ActivityFilterKind::Deny);
        assert_eq!(filter.local_file, PathBuf::from("configs/abl.strings"));
    }
}
