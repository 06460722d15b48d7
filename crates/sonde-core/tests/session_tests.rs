use std::path::{Path, PathBuf};

use chrono::TimeZone;
use sonde_agent::launch::ActivityFilterKind;
use sonde_core::manifest::{write_manifest, RunManifest};
use sonde_core::{ConfigError, ExplorationSession, RunOptions, RunPaths, SessionError};

fn options() -> RunOptions {
    RunOptions {
        packages: vec!["com.example.notes".into()],
        log_stamp: Some("S1".into()),
        ..RunOptions::default()
    }
}

// ── Options ──────────────────────────────────────────────────────────

#[test]
fn test_partial_json_keeps_defaults() {
    let opts = RunOptions::from_json_str(
        r#"{"packages": ["com.example.notes"], "max_steps": 50, "restart_app_period": 10}"#,
    )
    .unwrap();
    assert_eq!(opts.max_steps, Some(50));
    assert_eq!(opts.restart_app_period, Some(10));
    assert_eq!(opts.throttle_ms, 200);
    assert_eq!(opts.profile_period, 25);
    assert_eq!(opts.device_output_root, "/sdcard");
    assert_eq!(opts.output_dir, PathBuf::from("output"));
    assert!(opts.validate().is_ok());
}

#[test]
fn test_options_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.json");
    std::fs::write(&path, r#"{"packages": ["a"], "seed": 7}"#).unwrap();
    assert_eq!(RunOptions::from_json_file(&path).unwrap().seed, Some(7));

    let missing = RunOptions::from_json_file(&dir.path().join("nope.json"));
    assert!(matches!(missing, Err(ConfigError::Read { .. })));
    assert!(matches!(
        RunOptions::from_json_str("{"),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_validation_rules() {
    let mut o = options();
    o.act_whitelist_file = Some("/sdcard/awl.strings".into());
    o.act_blacklist_file = Some("/sdcard/abl.strings".into());
    assert!(matches!(o.validate(), Err(ConfigError::ConflictingActivityFilters)));

    let mut o = options();
    o.pre_failure_screenshots = 3;
    assert!(matches!(o.validate(), Err(ConfigError::ScreenshotsDisabled { pre: 3 })));
    o.take_screenshots = true;
    assert!(o.validate().is_ok());
    o.post_failure_screenshots = 4;
    assert!(matches!(
        o.validate(),
        Err(ConfigError::PostExceedsPre { pre: 3, post: 4 })
    ));

    let mut o = options();
    o.profile_period = 0;
    assert!(matches!(o.validate(), Err(ConfigError::ProfilePeriod)));

    let mut o = options();
    o.restart_app_period = Some(0);
    assert!(matches!(o.validate(), Err(ConfigError::RestartPeriod)));

    let mut o = options();
    o.running_minutes = 0.0;
    assert!(matches!(o.validate(), Err(ConfigError::RunningMinutes(_))));
}

#[test]
fn test_illegal_stamp_characters() {
    for bad in ["a/b", "a:b", "x?", "tab\there", "nul\0"] {
        let mut o = options();
        o.log_stamp = Some(bad.into());
        match o.validate() {
            Err(ConfigError::IllegalStampChar { stamp, .. }) => assert_eq!(stamp, bad),
            other => panic!("{bad:?} accepted: {other:?}"),
        }
    }
}

// ── Derived settings ─────────────────────────────────────────────────

#[test]
fn test_paths_follow_the_stamp() {
    let paths = RunPaths::new(Path::new("out"), "S1");
    assert_eq!(paths.output_dir, PathBuf::from("out/res_S1"));
    assert_eq!(paths.agent_log, PathBuf::from("out/res_S1/fastbot_S1.log"));
    assert_eq!(paths.counters_file, PathBuf::from("out/res_S1/result_S1.json"));
    assert_eq!(
        paths.exec_log_file,
        PathBuf::from("out/res_S1/property_exec_info_S1.json")
    );
    assert_eq!(paths.manifest_file, PathBuf::from("out/res_S1/bug_report_config.json"));
}

#[test]
fn test_launch_and_init_settings() {
    let mut o = options();
    o.running_minutes = 2.5;
    o.act_whitelist_file = Some("/sdcard/awl.strings".into());
    o.extra_agent_args = vec!["--ignore-crashes".into()];

    let spec = o.launch_spec("S1");
    assert_eq!(spec.running_minutes, 3);
    assert_eq!(spec.log_stamp, "S1");
    let filter = spec.activity_filter.clone().unwrap();
    assert_eq!(filter.kind, ActivityFilterKind::Allow);
    assert_eq!(filter.local_file, PathBuf::from("configs/awl.strings"));
    assert!(spec.command_line().contains("--act-whitelist-file /sdcard/awl.strings"));

    let init = serde_json::to_value(o.init_request("S1")).unwrap();
    assert_eq!(init["logStamp"], "S1");
    assert_eq!(init["deviceOutputRoot"], "/sdcard");
    assert_eq!(init["takeScreenshots"], false);

    let cfg = o.exploration_config(Path::new("out/res_S1"));
    assert_eq!(cfg.packages, o.packages);
    assert_eq!(cfg.running_minutes, Some(2.5));
    assert_eq!(cfg.diagnostics_dir, Some(PathBuf::from("out/res_S1")));
}

// ── Manifest ─────────────────────────────────────────────────────────

#[test]
fn test_manifest_fields() {
    let started = chrono::Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
    let manifest = RunManifest::new(&options(), "S1", &started);
    let json = serde_json::to_value(&manifest).unwrap();
    assert_eq!(json["packageNames"][0], "com.example.notes");
    assert_eq!(json["log_stamp"], "S1");
    assert_eq!(json["test_time"], "2026-03-04 05:06:07");
    assert_eq!(json["pre_failure_screenshots"], 0);
}

#[test]
fn test_manifest_is_written_into_the_run_directory() {
    let dir = tempfile::tempdir().unwrap();
    let mut o = options();
    o.output_dir = dir.path().to_path_buf();
    let paths = RunPaths::new(&o.output_dir, "S1");

    write_manifest(&o, &paths).unwrap();
    let text = std::fs::read_to_string(&paths.manifest_file).unwrap();
    let back: RunManifest = serde_json::from_str(&text).unwrap();
    assert_eq!(back.package_names, o.packages);
    assert_eq!(back.device_output_root, "/sdcard");
}

// ── Session ──────────────────────────────────────────────────────────

#[test]
fn test_invalid_options_fail_before_touching_the_device() {
    let err = ExplorationSession::new(RunOptions::default()).err().unwrap();
    assert!(matches!(err, SessionError::Config(ConfigError::NoPackages)));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn test_session_uses_the_configured_stamp() {
    let session = ExplorationSession::new(options()).unwrap();
    assert_eq!(session.paths().stamp, "S1");
    assert_eq!(session.paths().output_dir, PathBuf::from("output/res_S1"));
}

#[test]
fn test_exit_codes() {
    let setup = SessionError::PackageNotInstalled {
        package: "com.x".into(),
    };
    assert_eq!(setup.exit_code(), 3);
    let run = SessionError::Run(sonde_explore::EngineError::AgentAborted { code: 1 });
    assert_eq!(run.exit_code(), 1);
}
