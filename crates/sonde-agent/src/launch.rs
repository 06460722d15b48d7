//! Agent launch command line and the artifacts it needs on the device.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const CLASSPATH: &str =
    "/sdcard/monkeyq.jar:/sdcard/framework.jar:/sdcard/fastbot-thirdpart.jar:/sdcard/kea2-thirdpart.jar";

const JARS: [&str; 4] = [
    "monkeyq.jar",
    "fastbot-thirdpart.jar",
    "kea2-thirdpart.jar",
    "framework.jar",
];

const NATIVE_ABIS: [&str; 4] = ["arm64-v8a", "armeabi-v7a", "x86", "x86_64"];
const NATIVE_LIB: &str = "libfastbot_native.so";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityFilterKind {
    Allow,
    Deny,
}

/// An activity allow- or deny-list: a host file pushed to `device_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityFilter {
    pub kind: ActivityFilterKind,
    pub local_file: PathBuf,
    pub device_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub packages: Vec<String>,
    pub running_minutes: u64,
    pub throttle_ms: u64,
    pub device_output_root: String,
    pub log_stamp: String,
    pub profile_period: u64,
    pub activity_filter: Option<ActivityFilter>,
    pub extra_args: Vec<String>,
}

impl LaunchSpec {
    pub fn command_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            format!("CLASSPATH={CLASSPATH}"),
            "exec".into(),
            "app_process".into(),
            "/system/bin".into(),
            "com.android.commands.monkey.Monkey".into(),
            "--agent-u2".into(),
            "reuseq".into(),
            "--running-minutes".into(),
            self.running_minutes.to_string(),
            "--throttle".into(),
            self.throttle_ms.to_string(),
            "--bugreport".into(),
            "--output-directory".into(),
            format!("{}/output_{}", self.device_output_root, self.log_stamp),
        ];
        for pkg in &self.packages {
            args.push("-p".into());
            args.push(pkg.clone());
        }
        args.push("--profile-period".into());
        args.push(self.profile_period.to_string());
        if let Some(filter) = &self.activity_filter {
            let flag = match filter.kind {
                ActivityFilterKind::Allow => "--act-whitelist-file",
                ActivityFilterKind::Deny => "--act-blacklist-file",
            };
            args.push(flag.into());
            args.push(filter.device_path.clone());
        }
        args.extend(["-v", "-v", "-v"].map(String::from));
        args.extend(self.extra_args.iter().cloned());
        args
    }

    pub fn command_line(&self) -> String {
        self.command_args().join(" ")
    }
}

/// `(host file, device path)` pairs to push before launch.
pub fn artifact_pushes(assets_dir: &Path, filter: Option<&ActivityFilter>) -> Vec<(PathBuf, String)> {
    let mut pushes: Vec<(PathBuf, String)> = JARS
        .iter()
        .map(|jar| (assets_dir.join(jar), format!("/sdcard/{jar}")))
        .collect();
    pushes.extend(NATIVE_ABIS.iter().map(|abi| {
        (
            assets_dir.join("fastbot_libs").join(abi).join(NATIVE_LIB),
            format!("/data/local/tmp/{abi}/{NATIVE_LIB}"),
        )
    }));
    if let Some(filter) = filter {
        pushes.push((filter.local_file.clone(), filter.device_path.clone()));
    }
    pushes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> LaunchSpec {
        LaunchSpec {
            packages: vec!["com.a".into(), "com.b".into()],
            running_minutes: 10,
            throttle_ms: 200,
            device_output_root: "/sdcard".into(),
            log_stamp: "S1".into(),
            profile_period: 25,
            activity_filter: None,
            extra_args: vec![],
        }
    }

    #[test]
    fn test_command_line_order() {
        assert_eq!(
            spec().command_line(),
            "CLASSPATH=/sdcard/monkeyq.jar:/sdcard/framework.jar:/sdcard/fastbot-thirdpart.jar:/sdcard/kea2-thirdpart.jar \
             exec app_process /system/bin com.android.commands.monkey.Monkey --agent-u2 reuseq \
             --running-minutes 10 --throttle 200 --bugreport --output-directory /sdcard/output_S1 \
             -p com.a -p com.b --profile-period 25 -v -v -v"
        );
    }

    #[test]
    fn test_deny_list_and_extra_args() {
        let mut s = spec();
        s.activity_filter = Some(ActivityFilter {
            kind: ActivityFilterKind::Deny,
            local_file: PathBuf::from("configs/abl.strings"),
            device_path: "/sdcard/abl.strings".into(),
        });
        s.extra_args = vec!["--foo".into()];
        let args = s.command_args();
        let at = args.iter().position(|a| a == "--act-blacklist-file").unwrap();
        assert_eq!(args[at + 1], "/sdcard/abl.strings");
        assert!(!args.iter().any(|a| a == "--act-whitelist-file"));
        assert_eq!(args.last().map(String::as_str), Some("--foo"));
    }

    #[test]
    fn test_artifact_pushes() {
        let pushes = artifact_pushes(Path::new("/opt/assets"), None);
        assert_eq!(pushes.len(), 8);
        assert!(pushes.contains(&(
            PathBuf::from("/opt/assets/fastbot_libs/x86_64/libfastbot_native.so"),
            "/data/local/tmp/x86_64/libfastbot_native.so".to_string()
        )));
        assert_eq!(pushes[0].1, "/sdcard/monkeyq.jar");
    }
}
