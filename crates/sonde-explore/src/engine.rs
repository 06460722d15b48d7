//! The exploration loop.
//!
//! Each iteration either advances the fuzzer one step or, right after a
//! script ran, re-dumps the hierarchy the script left behind. The snapshot
//! is checked against every property's preconditions; one satisfied
//! property may then run, gated by its probability.
//!
//! At most one script runs per step count, and a restart fires at most
//! once per step count, so a reused snapshot never repeats either.

use std::collections::BTreeMap;

use serde::Serialize;

use sonde_agent::api::{AgentError, FuzzAgent, ScriptLogEntry, ScriptState, StepRequest};
use sonde_checker::StaticChecker;

use crate::background::{ArtifactSync, FatalLog, LogMonitor};
use crate::block::{resolve_block_list, BlockRule};
use crate::budget::{BudgetChecker, StopReason};
use crate::config::ExplorationConfig;
use crate::device::DeviceDriver;
use crate::property::{PreconditionOutcome, PropStatistic, PropertyRegistry, ScriptOutcome};
use crate::results::{ExecutionRecord, RecordError, ResultRecorder};
use crate::select::{Selection, SelectionPolicy};

/// Marker sent to the agent after the apps were stopped.
pub const RESTART_MARKER: &str = "kill_apps";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Init,
    Running,
    Stopping,
    Done,
}

/// Loop counters, reported with the summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IterationStats {
    pub fuzz_steps: u64,
    pub snapshot_reuses: u64,
    pub restarts: u64,
    pub none_satisfied: u64,
    pub none_eligible: u64,
    pub evaluation_errors: u64,
    pub executions: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub stop_reason: StopReason,
    pub steps_count: u64,
    pub properties: BTreeMap<String, PropStatistic>,
    pub stats: IterationStats,
}

impl RunSummary {
    pub fn fails(&self) -> u64 {
        self.properties.values().map(|s| s.fail).sum()
    }

    pub fn errors(&self) -> u64 {
        self.properties.values().map(|s| s.error).sum()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("agent call failed: {0}")]
    Agent(#[from] AgentError),
    #[error("agent aborted with exit code {code}")]
    AgentAborted { code: i32 },
    #[error(transparent)]
    FatalAgentLog(#[from] FatalLog),
    #[error(transparent)]
    Results(#[from] RecordError),
}

pub struct ExplorationEngine<'a> {
    config: ExplorationConfig,
    agent: &'a mut dyn FuzzAgent,
    device: &'a dyn DeviceDriver,
    registry: PropertyRegistry,
    block_rules: Vec<BlockRule>,
    recorder: ResultRecorder,
    policy: SelectionPolicy,
    budget: BudgetChecker,
    syncer: Option<Box<dyn ArtifactSync + 'a>>,
    log_monitor: Option<Box<dyn LogMonitor + 'a>>,
    phase: EnginePhase,
    steps_count: u64,
    snapshot: Option<StaticChecker>,
    /// The previous iteration ran a script; dump instead of stepping.
    reuse_snapshot: bool,
    last_restart_at: Option<u64>,
    last_executed_at: Option<u64>,
    /// Cleared once the agent process is known to have exited.
    agent_running: bool,
    stats: IterationStats,
}

impl<'a> ExplorationEngine<'a> {
    pub fn new(
        config: ExplorationConfig,
        agent: &'a mut dyn FuzzAgent,
        device: &'a dyn DeviceDriver,
        registry: PropertyRegistry,
        recorder: ResultRecorder,
    ) -> Self {
        let policy = SelectionPolicy::new(config.seed);
        let budget = BudgetChecker::new(config.max_steps, config.running_time());
        Self {
            config,
            agent,
            device,
            registry,
            block_rules: Vec::new(),
            recorder,
            policy,
            budget,
            syncer: None,
            log_monitor: None,
            phase: EnginePhase::Init,
            steps_count: 0,
            snapshot: None,
            reuse_snapshot: false,
            last_restart_at: None,
            last_executed_at: None,
            agent_running: true,
            stats: IterationStats::default(),
        }
    }

    pub fn with_block_rules(mut self, rules: Vec<BlockRule>) -> Self {
        self.block_rules = rules;
        self
    }

    pub fn with_syncer(mut self, syncer: Box<dyn ArtifactSync + 'a>) -> Self {
        self.syncer = Some(syncer);
        self
    }

    pub fn with_log_monitor(mut self, monitor: Box<dyn LogMonitor + 'a>) -> Self {
        self.log_monitor = Some(monitor);
        self
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    /// Run until a budget is spent or the agent stops, then shut the
    /// collaborators down. Results are flushed even when the run fails.
    pub fn run(mut self) -> Result<RunSummary, EngineError> {
        if self.registry.is_empty() {
            tracing::warn!("no property has been registered");
        }
        let outcome = match self.recorder.flush(&self.registry) {
            Ok(()) => {
                self.enter(EnginePhase::Running);
                self.budget = BudgetChecker::new(self.config.max_steps, self.config.running_time());
                self.explore()
            }
            Err(e) => Err(e.into()),
        };
        self.enter(EnginePhase::Stopping);
        let result = self.stop(outcome);
        self.enter(EnginePhase::Done);
        result
    }

    fn enter(&mut self, phase: EnginePhase) {
        tracing::debug!(from = ?self.phase, to = ?phase, "engine phase");
        self.phase = phase;
    }

    // ── Running ──────────────────────────────────────────────────────

    fn explore(&mut self) -> Result<StopReason, EngineError> {
        loop {
            if let Some(fatal) = self.log_monitor.as_mut().and_then(|m| m.poll_fatal()) {
                return Err(fatal.into());
            }
            if self.budget.time_exceeded() {
                tracing::info!("exploration time is up");
                return Ok(StopReason::TimeBudget);
            }
            if self.config.restart_due(self.steps_count) && self.last_restart_at != Some(self.steps_count) {
                self.restart_app();
                continue;
            }

            let fresh = !self.reuse_snapshot;
            if fresh && self.budget.steps_exhausted(self.steps_count) {
                tracing::info!(steps = self.steps_count, "step budget reached");
                return Ok(StopReason::StepBudget);
            }
            let xml = match self.capture(fresh) {
                Ok(xml) => xml,
                Err(e) => return self.agent_failure(e),
            };
            self.snapshot = self.load_snapshot(&xml);

            if self.config.profile_due(self.steps_count) {
                if let Some(syncer) = &self.syncer {
                    syncer.trigger();
                }
            }
            if self.last_executed_at == Some(self.steps_count) {
                continue;
            }

            let Some(candidates) = self.satisfied_candidates() else {
                continue;
            };
            if candidates.is_empty() {
                self.stats.none_satisfied += 1;
                continue;
            }
            match self.policy.select(&candidates) {
                Selection::NoneEligible { draw } => {
                    self.stats.none_eligible += 1;
                    tracing::info!(draw, "no property executed due to probability");
                }
                Selection::Chosen { index, .. } => self.execute(index)?,
            }
        }
    }

    fn capture(&mut self, fresh: bool) -> Result<String, AgentError> {
        if !fresh {
            self.reuse_snapshot = false;
            self.stats.snapshot_reuses += 1;
            return self.agent.dump_hierarchy();
        }
        let block = resolve_block_list(&self.block_rules, self.snapshot.as_ref());
        self.steps_count += 1;
        self.stats.fuzz_steps += 1;
        tracing::info!(progress = %self.budget.progress(self.steps_count), "sending monkey event");
        self.agent.step_monkey(&StepRequest {
            block,
            steps_count: self.steps_count,
        })
    }

    /// A refused connection from an agent that exited cleanly is the
    /// agent's own time budget running out.
    fn agent_failure(&mut self, err: AgentError) -> Result<StopReason, EngineError> {
        match err {
            AgentError::Exited { code } => {
                self.agent_running = false;
                Err(EngineError::AgentAborted { code })
            }
            e if e.is_disconnect() => {
                tracing::info!(error = %e, "connection refused by the agent");
                let code = self.agent.return_code();
                self.agent_running = false;
                match code {
                    Some(0) => {
                        tracing::info!("agent finished its running time");
                        Ok(StopReason::AgentFinished)
                    }
                    other => Err(EngineError::AgentAborted {
                        code: other.unwrap_or(-1),
                    }),
                }
            }
            e => Err(e.into()),
        }
    }

    fn load_snapshot(&self, xml: &str) -> Option<StaticChecker> {
        match StaticChecker::with_diagnostics(xml, self.config.diagnostics_dir.as_deref()) {
            Ok(checker) => Some(checker),
            Err(e) => {
                tracing::error!(error = %e, step = self.steps_count, "unusable hierarchy, skipping iteration");
                None
            }
        }
    }

    /// `(index, prob)` of every property that may run on the current
    /// snapshot. `None` when there is no snapshot.
    fn satisfied_candidates(&mut self) -> Option<Vec<(usize, f64)>> {
        let checker = self.snapshot.as_ref()?;
        let mut candidates = Vec::new();
        for index in 0..self.registry.len() {
            let prop = self.registry.property(index);
            if prop.exhausted() {
                tracing::debug!(property = %prop.name(), "reached max_tries, skipped");
                continue;
            }
            match prop.evaluate(checker) {
                PreconditionOutcome::Satisfied => candidates.push((index, prop.prob())),
                PreconditionOutcome::NotSatisfied => {}
                PreconditionOutcome::EvaluationError(e) => {
                    self.stats.evaluation_errors += 1;
                    tracing::error!(property = %prop.name(), error = %e, "precondition check failed");
                }
            }
        }
        for (index, _) in &candidates {
            self.registry.property_mut(*index).stats.precond_satisfied += 1;
        }
        tracing::info!(count = candidates.len(), "preconditions satisfied");
        Some(candidates)
    }

    fn execute(&mut self, index: usize) -> Result<(), EngineError> {
        let steps = self.steps_count;
        let name = self.registry.property(index).name().to_string();
        tracing::info!(property = %name, step = steps, "executing property");

        self.log_script(&name, steps, ScriptState::Start);
        let outcome = self.registry.property_mut(index).run(self.device, steps);
        match &outcome {
            ScriptOutcome::Pass => tracing::info!(property = %name, "property passed"),
            ScriptOutcome::Fail(tb) => tracing::error!(property = %name, "FAIL\n{tb}"),
            ScriptOutcome::Error(tb) => tracing::error!(property = %name, "ERROR\n{tb}"),
        }
        self.log_script(&name, steps, outcome.state());

        self.recorder.record(ExecutionRecord {
            prop_name: name,
            start_steps_count: steps,
            state: outcome.state(),
            traceback: outcome.traceback().to_string(),
        });
        self.recorder.flush(&self.registry)?;

        self.last_executed_at = Some(steps);
        self.reuse_snapshot = true;
        self.stats.executions += 1;
        Ok(())
    }

    fn log_script(&mut self, name: &str, steps: u64, state: ScriptState) {
        let entry = ScriptLogEntry {
            prop_name: name.to_string(),
            start_steps_count: steps,
            state,
        };
        if let Err(e) = self.agent.log_script(&entry) {
            tracing::warn!(error = %e, property = name, "could not log script state");
        }
    }

    fn restart_app(&mut self) {
        tracing::info!(step = self.steps_count, "restarting the app under test");
        for package in &self.config.packages {
            tracing::info!(package = %package, "stopping app");
            if let Err(e) = self.device.app_stop(package) {
                tracing::warn!(package = %package, error = %e, "could not stop app");
            }
        }
        std::thread::sleep(self.config.restart_settle());
        if let Err(e) = self.agent.send_info(RESTART_MARKER) {
            tracing::warn!(error = %e, "could not notify the agent of the restart");
        }
        self.last_restart_at = Some(self.steps_count);
        self.reuse_snapshot = false;
        self.snapshot = None;
        self.stats.restarts += 1;
    }

    // ── Stopping ─────────────────────────────────────────────────────

    fn stop(&mut self, outcome: Result<StopReason, EngineError>) -> Result<RunSummary, EngineError> {
        let aborted = matches!(outcome, Err(EngineError::AgentAborted { .. }));
        if self.agent_running && !aborted {
            if let Err(e) = self.agent.stop_monkey() {
                tracing::warn!(error = %e, "stop request to the agent failed");
            }
        }
        let flushed = self.recorder.flush(&self.registry);
        if let Some(syncer) = self.syncer.as_mut() {
            syncer.close();
        }

        let exit = match (&outcome, self.agent_running) {
            (Ok(_), true) => {
                self.agent_running = false;
                self.agent.return_code()
            }
            _ => None,
        };
        let log_result = match self.log_monitor.as_mut() {
            Some(monitor) => monitor.close(),
            None => Ok(()),
        };
        self.log_summary();

        let reason = outcome?;
        if let Some(code) = exit.filter(|c| *c != 0) {
            return Err(EngineError::AgentAborted { code });
        }
        log_result?;
        flushed?;
        Ok(RunSummary {
            stop_reason: reason,
            steps_count: self.steps_count,
            properties: self.registry.statistics(),
            stats: self.stats,
        })
    }

    fn log_summary(&self) {
        let stats = self.registry.statistics();
        let errors: u64 = stats.values().map(|s| s.error).sum();
        let fails: u64 = stats.values().map(|s| s.fail).sum();
        tracing::info!("[Property Execution Summary] Errors:{errors}, Fails:{fails}");
        tracing::debug!(stats = ?self.stats, steps = self.steps_count, "iteration statistics");
    }
}
