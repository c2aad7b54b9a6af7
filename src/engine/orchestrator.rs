//! Check execution orchestrator.
//!
//! Resolves a flow of check identifiers against a registry and runs them in
//! order over one conversation.
//!
//! # Graceful Degradation
//!
//! - Unknown identifier or rejected parameters: the whole flow is refused
//!   before any check runs
//! - Check returns `CheckError`: recorded as a Critical outcome, the flow
//!   continues
//! - Check panics: caught via std::panic::catch_unwind, recorded as a
//!   Critical outcome, the flow continues
//! - Interaction outcome: the flow stops (a human has to take over)
//! - fail_fast: the flow stops after the first outcome at Error or above
//! - Empty flow: returns an empty report (not an error)

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::checks::{CheckFn, Params};
use crate::conversation::Conversation;
use crate::engine::registry::{CheckDef, Registry};
use crate::engine::result::{CheckRecord, Report, ResultAggregator};
use crate::{Error, Outcome, Result, Status};

/// One step of a flow: a check identifier and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowStep {
    pub id: String,
    #[serde(default)]
    pub params: Params,
}

impl FlowStep {
    pub fn new(id: impl Into<String>) -> Self {
        FlowStep {
            id: id.into(),
            params: Params::new(),
        }
    }

    pub fn with_params(id: impl Into<String>, params: Params) -> Self {
        FlowStep {
            id: id.into(),
            params,
        }
    }
}

/// Ordered list of checks to run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Flow {
    steps: Vec<FlowStep>,
}

fn flow_error(message: impl Into<String>) -> Error {
    Error::Parse {
        context: "flow".to_string(),
        message: message.into(),
    }
}

fn step_params(id: &str, value: Value) -> Result<Params> {
    match value {
        Value::Null => Ok(Params::new()),
        Value::Object(map) => Ok(map),
        other => Err(flow_error(format!("parameters of '{}' must be an object, got {}", id, other))),
    }
}

impl Flow {
    pub fn new(steps: Vec<FlowStep>) -> Self {
        Flow { steps }
    }

    /// Flow of parameterless checks.
    pub fn from_ids<S: AsRef<str>>(ids: &[S]) -> Self {
        Flow::new(ids.iter().map(|id| FlowStep::new(id.as_ref())).collect())
    }

    /// Parse a flow file.
    ///
    /// Accepts a list of steps (`{"id": .., "params": {..}}` or a bare
    /// identifier) or an object mapping identifiers to parameters, in
    /// document order.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json).map_err(|e| flow_error(e.to_string()))?;
        let steps = match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(id) => Ok(FlowStep::new(id)),
                    step @ Value::Object(_) => serde_json::from_value(step).map_err(|e| flow_error(e.to_string())),
                    other => Err(flow_error(format!("unexpected flow step {}", other))),
                })
                .collect::<Result<Vec<_>>>()?,
            Value::Object(map) => map
                .into_iter()
                .map(|(id, params)| {
                    let params = step_params(&id, params)?;
                    Ok(FlowStep::with_params(id, params))
                })
                .collect::<Result<Vec<_>>>()?,
            _ => return Err(flow_error("a flow is a list of steps or an object of id to params")),
        };
        Ok(Flow { steps })
    }

    /// Load a flow file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::Io {
            context: path.display().to_string(),
            source: e,
        })?;
        Self::from_json(&content)
    }

    pub fn steps(&self) -> &[FlowStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The flow without the named checks.
    pub fn excluding(&self, skip_ids: &[String]) -> Flow {
        Flow {
            steps: self
                .steps
                .iter()
                .filter(|s| !skip_ids.contains(&s.id))
                .cloned()
                .collect(),
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Stop after the first outcome at Error or above
    pub fail_fast: bool,
    /// Stop when a check asks for human interaction
    pub stop_on_interaction: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            fail_fast: false,
            stop_on_interaction: true,
        }
    }
}

/// A flow step bound to its definition and parameters
struct PreparedCheck<'r> {
    def: &'r CheckDef,
    check: CheckFn,
}

/// Check orchestrator
pub struct CheckOrchestrator<'r> {
    config: OrchestratorConfig,
    registry: &'r Registry,
}

impl<'r> CheckOrchestrator<'r> {
    pub fn new(config: OrchestratorConfig, registry: &'r Registry) -> Self {
        CheckOrchestrator { config, registry }
    }

    /// Resolve and build every step of the flow.
    fn prepare(&self, flow: &Flow) -> Result<Vec<PreparedCheck<'r>>> {
        flow.steps()
            .iter()
            .map(|step| {
                let def = self.registry.resolve(&step.id)?;
                let check = def.instantiate(&step.params)?;
                Ok(PreparedCheck { def, check })
            })
            .collect()
    }

    /// Run a flow over the conversation
    pub fn run(&self, conv: &mut Conversation, flow: &Flow) -> Result<Report> {
        let prepared = self.prepare(flow)?;
        info!(checks = prepared.len(), registry = self.registry.name(), "running flow");

        let start = Instant::now();
        let mut aggregator = ResultAggregator::new();

        for check in &prepared {
            let record = self.execute_check(check, conv);
            let status = record.status();
            aggregator.add_result(record);

            if status == Status::Interaction && self.config.stop_on_interaction {
                info!(check = check.def.id, "interaction required, stopping flow");
                aggregator.halt(check.def.id);
                break;
            }
            if self.config.fail_fast && status >= Status::Error {
                info!(check = check.def.id, %status, "fail fast, stopping flow");
                aggregator.halt(check.def.id);
                break;
            }
        }

        let report = aggregator.into_report(start.elapsed().as_millis() as u64);
        info!(
            worst = %report.worst_status(),
            duration_ms = report.total_duration_ms,
            "flow finished"
        );
        Ok(report)
    }

    /// Execute a single check
    fn execute_check(&self, check: &PreparedCheck<'_>, conv: &mut Conversation) -> CheckRecord {
        let start = Instant::now();
        debug!(check = check.def.id, "evaluating");

        let outcome = match catch_unwind(AssertUnwindSafe(|| (check.check)(conv))) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => Outcome::raised(
                Status::Critical,
                format!("Could not evaluate the conversation: {}", e),
            ),
            Err(panic) => Outcome::raised(
                Status::Critical,
                format!("Check panicked during execution: {}", panic_message(panic.as_ref())),
            ),
        };

        if outcome.status >= Status::Warning {
            warn!(
                check = check.def.id,
                status = %outcome.status,
                message = outcome.message.as_deref().unwrap_or_default(),
                "check raised"
            );
        }

        CheckRecord {
            id: check.def.id.to_string(),
            name: check.def.name.to_string(),
            category: check.def.category,
            outcome,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
