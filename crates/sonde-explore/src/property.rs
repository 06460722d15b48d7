//! Property descriptors and the registry the exploration loop draws from.
//!
//! A property is a script gated by one or more preconditions over the
//! current UI snapshot. Registration validates every descriptor up front;
//! invalid ones are reported and left out while the rest register.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};

use sonde_agent::api::ScriptState;
use sonde_checker::StaticChecker;

use crate::device::DeviceDriver;

/// A predicate over the current snapshot.
pub type Precondition = Box<dyn Fn(&StaticChecker) -> anyhow::Result<bool>>;

/// A property body, run against the live device.
pub type Script = Box<dyn FnMut(&mut ScriptContext<'_>) -> Result<(), ScriptFailure>>;

/// What a running script can reach.
pub struct ScriptContext<'a> {
    pub device: &'a dyn DeviceDriver,
    /// Fuzz step at which the script started.
    pub steps_count: u64,
    pub property: &'a str,
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptFailure {
    /// The property's assertion did not hold.
    #[error("assertion failed: {0}")]
    Assertion(String),
    /// The script could not run to completion.
    #[error(transparent)]
    Error(#[from] anyhow::Error),
}

/// Fail the running script unless `condition` holds.
pub fn ensure(condition: bool, message: impl Into<String>) -> Result<(), ScriptFailure> {
    if condition {
        Ok(())
    } else {
        Err(ScriptFailure::Assertion(message.into()))
    }
}

// ── Outcomes ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreconditionOutcome {
    Satisfied,
    NotSatisfied,
    /// A predicate returned an error or panicked. Treated as not satisfied.
    EvaluationError(String),
}

impl PreconditionOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, PreconditionOutcome::Satisfied)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    Pass,
    Fail(String),
    Error(String),
}

impl ScriptOutcome {
    pub fn state(&self) -> ScriptState {
        match self {
            ScriptOutcome::Pass => ScriptState::Pass,
            ScriptOutcome::Fail(_) => ScriptState::Fail,
            ScriptOutcome::Error(_) => ScriptState::Error,
        }
    }

    pub fn traceback(&self) -> &str {
        match self {
            ScriptOutcome::Pass => "",
            ScriptOutcome::Fail(tb) | ScriptOutcome::Error(tb) => tb,
        }
    }
}

/// Evaluate a conjunction of preconditions, stopping at the first one
/// that does not hold.
pub fn evaluate_preconditions(preconditions: &[Precondition], checker: &StaticChecker) -> PreconditionOutcome {
    for precondition in preconditions {
        match catch_unwind(AssertUnwindSafe(|| precondition(checker))) {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => return PreconditionOutcome::NotSatisfied,
            Ok(Err(e)) => return PreconditionOutcome::EvaluationError(format!("{e:#}")),
            Err(payload) => return PreconditionOutcome::EvaluationError(panic_message(payload.as_ref())),
        }
    }
    PreconditionOutcome::Satisfied
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

// ── Descriptors ──────────────────────────────────────────────────────

/// Builder for one property.
pub struct PropertyDef {
    name: String,
    preconditions: Vec<Precondition>,
    prob: f64,
    max_tries: Option<u32>,
    script: Script,
}

impl PropertyDef {
    pub fn new<F>(name: impl Into<String>, script: F) -> Self
    where
        F: FnMut(&mut ScriptContext<'_>) -> Result<(), ScriptFailure> + 'static,
    {
        Self {
            name: name.into(),
            preconditions: Vec::new(),
            prob: 1.0,
            max_tries: None,
            script: Box::new(script),
        }
    }

    pub fn precondition<F>(mut self, f: F) -> Self
    where
        F: Fn(&StaticChecker) -> anyhow::Result<bool> + 'static,
    {
        self.preconditions.push(Box::new(f));
        self
    }

    pub fn prob(mut self, prob: f64) -> Self {
        self.prob = prob;
        self
    }

    pub fn max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = Some(max_tries);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if !(self.prob > 0.0 && self.prob <= 1.0) {
            return Err(RegistryError::InvalidProbability {
                name: self.name.clone(),
                prob: self.prob,
            });
        }
        if self.max_tries == Some(0) {
            return Err(RegistryError::InvalidMaxTries {
                name: self.name.clone(),
            });
        }
        if self.preconditions.is_empty() {
            return Err(RegistryError::NoPreconditions {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for PropertyDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyDef")
            .field("name", &self.name)
            .field("preconditions", &self.preconditions.len())
            .field("prob", &self.prob)
            .field("max_tries", &self.max_tries)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("property {name}: probability {prob} is outside (0, 1]")]
    InvalidProbability { name: String, prob: f64 },
    #[error("property {name}: max_tries must be at least 1")]
    InvalidMaxTries { name: String },
    #[error("property {name}: at least one precondition is required")]
    NoPreconditions { name: String },
    #[error("property {name} is already registered")]
    DuplicateName { name: String },
}

// ── Registered properties ────────────────────────────────────────────

/// Per-property counters, persisted after every execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropStatistic {
    pub precond_satisfied: u64,
    pub executed: u64,
    pub fail: u64,
    pub error: u64,
}

#[derive(Debug)]
pub struct Property {
    def: PropertyDef,
    pub stats: PropStatistic,
}

impl Property {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn prob(&self) -> f64 {
        self.def.prob
    }

    pub fn max_tries(&self) -> Option<u32> {
        self.def.max_tries
    }

    /// Whether the execution limit has been reached.
    pub fn exhausted(&self) -> bool {
        self.def
            .max_tries
            .is_some_and(|max| self.stats.executed >= u64::from(max))
    }

    pub fn evaluate(&self, checker: &StaticChecker) -> PreconditionOutcome {
        evaluate_preconditions(&self.def.preconditions, checker)
    }

    /// Run the script and fold its outcome into the counters. `executed`
    /// is counted before the body runs.
    pub fn run(&mut self, device: &dyn DeviceDriver, steps_count: u64) -> ScriptOutcome {
        self.stats.executed += 1;
        let PropertyDef { name, script, .. } = &mut self.def;
        let mut ctx = ScriptContext {
            device,
            steps_count,
            property: name,
        };
        let outcome = match catch_unwind(AssertUnwindSafe(|| script(&mut ctx))) {
            Ok(Ok(())) => ScriptOutcome::Pass,
            Ok(Err(ScriptFailure::Assertion(msg))) => ScriptOutcome::Fail(msg),
            Ok(Err(ScriptFailure::Error(e))) => ScriptOutcome::Error(format!("{e:?}")),
            Err(payload) => ScriptOutcome::Error(panic_message(payload.as_ref())),
        };
        match outcome {
            ScriptOutcome::Pass => {}
            ScriptOutcome::Fail(_) => self.stats.fail += 1,
            ScriptOutcome::Error(_) => self.stats.error += 1,
        }
        outcome
    }
}

/// All properties of a session, in registration order.
#[derive(Debug, Default)]
pub struct PropertyRegistry {
    properties: Vec<Property>,
    rejected: Vec<RegistryError>,
}

impl PropertyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_defs(defs: impl IntoIterator<Item = PropertyDef>) -> Self {
        let mut registry = Self::new();
        for def in defs {
            // Rejections are kept in `rejected`.
            let _ = registry.register(def);
        }
        registry
    }

    /// Validate and add one property. A rejected descriptor is logged and
    /// remembered; it does not affect the ones already registered.
    pub fn register(&mut self, def: PropertyDef) -> Result<(), RegistryError> {
        let checked = def.validate().and_then(|()| {
            if self.get(&def.name).is_some() {
                Err(RegistryError::DuplicateName {
                    name: def.name.clone(),
                })
            } else {
                Ok(())
            }
        });
        match checked {
            Ok(()) => {
                tracing::info!(property = %def.name, "loaded property");
                self.properties.push(Property {
                    def,
                    stats: PropStatistic::default(),
                });
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "rejected property");
                self.rejected.push(e.clone());
                Err(e)
            }
        }
    }

    pub fn rejected(&self) -> &[RegistryError] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter()
    }

    pub(crate) fn property(&self, index: usize) -> &Property {
        &self.properties[index]
    }

    pub(crate) fn property_mut(&mut self, index: usize) -> &mut Property {
        &mut self.properties[index]
    }

    pub fn statistics(&self) -> BTreeMap<String, PropStatistic> {
        self.properties
            .iter()
            .map(|p| (p.name().to_string(), p.stats))
            .collect()
    }
}
