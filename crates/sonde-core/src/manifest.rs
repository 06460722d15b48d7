//! `bug_report_config.json`: what a later report needs to know about a run.

use std::path::Path;

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::config::{RunOptions, RunPaths};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    #[serde(rename = "packageNames")]
    pub package_names: Vec<String>,
    pub take_screenshots: bool,
    pub pre_failure_screenshots: u32,
    pub post_failure_screenshots: u32,
    pub device_output_root: String,
    pub log_stamp: String,
    pub test_time: String,
}

impl RunManifest {
    pub fn new<Tz>(options: &RunOptions, stamp: &str, started: &DateTime<Tz>) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        Self {
            package_names: options.packages.clone(),
            take_screenshots: options.take_screenshots,
            pre_failure_screenshots: options.pre_failure_screenshots,
            post_failure_screenshots: options.post_failure_screenshots,
            device_output_root: options.device_output_root.clone(),
            log_stamp: stamp.to_string(),
            test_time: started.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }
}

/// Create the run's output directory and write its manifest there.
pub fn write_manifest(options: &RunOptions, paths: &RunPaths) -> std::io::Result<RunManifest> {
    std::fs::create_dir_all(&paths.output_dir)?;
    let manifest = RunManifest::new(options, &paths.stamp, &chrono::Local::now());
    manifest.write(&paths.manifest_file)?;
    tracing::debug!(path = %paths.manifest_file.display(), "run manifest written");
    Ok(manifest)
}
