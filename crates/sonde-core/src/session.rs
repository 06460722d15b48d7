//! One exploration run against a real device, from option checks to the
//! final summary.

use std::sync::Arc;

use sonde_agent::config::AgentConfig;
use sonde_agent::{AgentError, AgentProxy};
use sonde_explore::background::{ArtifactSyncer, LogWatcher};
use sonde_explore::block::BlockRule;
use sonde_explore::property::PropertyRegistry;
use sonde_explore::results::ResultRecorder;
use sonde_explore::{EngineError, ExplorationEngine, RunSummary};
use sonde_transport::config::AdbConfig;
use sonde_transport::{AdbDevice, TransportError};

use crate::config::{ConfigError, RunOptions, RunPaths};
use crate::manifest::write_manifest;
use crate::telemetry::init_logging;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid options: {0}")]
    Config(#[from] ConfigError),

    #[error("device setup failed: {0}")]
    Device(#[from] TransportError),

    #[error("package {package} is not installed on the device")]
    PackageNotInstalled { package: String },

    #[error("could not prepare {}: {source}", .path.display())]
    Output {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("agent setup failed: {0}")]
    AgentSetup(#[source] AgentError),

    #[error(transparent)]
    Run(#[from] EngineError),
}

impl SessionError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            SessionError::Config(_) => 2,
            SessionError::Device(_)
            | SessionError::PackageNotInstalled { .. }
            | SessionError::Output { .. }
            | SessionError::AgentSetup(_) => 3,
            SessionError::Run(_) => 1,
        }
    }
}

/// The first wanted package absent from `installed`.
pub fn first_missing<'p>(installed: &[String], wanted: &'p [String]) -> Option<&'p str> {
    wanted
        .iter()
        .find(|pkg| !installed.contains(pkg))
        .map(String::as_str)
}

pub struct ExplorationSession {
    options: RunOptions,
    paths: RunPaths,
}

impl ExplorationSession {
    /// Validate `options`, fix the run stamp and install logging.
    pub fn new(options: RunOptions) -> Result<Self, SessionError> {
        init_logging(options.debug);
        options.validate()?;
        let stamp = options.resolve_stamp();
        let paths = RunPaths::new(&options.output_dir, &stamp);
        Ok(Self { options, paths })
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    /// Launch the agent, explore until a budget or the agent ends the run,
    /// and tear everything down again.
    pub fn run(
        self,
        registry: PropertyRegistry,
        block_rules: Vec<BlockRule>,
    ) -> Result<RunSummary, SessionError> {
        let opts = &self.options;
        let paths = &self.paths;
        tracing::info!(stamp = %paths.stamp, output = %paths.output_dir.display(), "starting exploration session");
        for rejected in registry.rejected() {
            tracing::warn!(error = %rejected, "property skipped");
        }

        let device = AdbDevice::resolve(
            AdbConfig::from_env(),
            opts.serial.as_deref(),
            opts.transport_id,
        )?;
        let installed = device.list_packages()?;
        if let Some(package) = first_missing(&installed, &opts.packages) {
            tracing::error!(package, "target package not installed");
            return Err(SessionError::PackageNotInstalled {
                package: package.to_string(),
            });
        }

        write_manifest(opts, paths).map_err(|source| SessionError::Output {
            path: paths.output_dir.clone(),
            source,
        })?;

        let agent_config = AgentConfig {
            throttle_ms: opts.throttle_ms,
            assets_dir: opts.assets_dir.clone(),
            ..AgentConfig::default()
        };
        let mut proxy = AgentProxy::new(device.clone(), agent_config);
        proxy
            .start(&opts.launch_spec(&paths.stamp), &paths.agent_log)
            .map_err(SessionError::AgentSetup)?;
        let log_watcher = LogWatcher::spawn(&paths.agent_log);
        proxy.check_alive().map_err(SessionError::AgentSetup)?;
        let device_dir = proxy
            .init(&opts.init_request(&paths.stamp))
            .map_err(SessionError::AgentSetup)?;

        let device = Arc::new(device);
        let syncer = ArtifactSyncer::spawn(Arc::clone(&device), device_dir, &paths.output_dir);
        let recorder = ResultRecorder::new(&paths.counters_file, &paths.exec_log_file);
        let config = opts.exploration_config(&paths.output_dir);

        let outcome = ExplorationEngine::new(config, &mut proxy, &*device, registry, recorder)
            .with_block_rules(block_rules)
            .with_syncer(Box::new(syncer))
            .with_log_monitor(Box::new(log_watcher))
            .run();
        proxy.shutdown();

        let summary = outcome?;
        tracing::info!(
            steps = summary.steps_count,
            stop = ?summary.stop_reason,
            results = %paths.counters_file.display(),
            "exploration session finished"
        );
        Ok(summary)
    }
}
