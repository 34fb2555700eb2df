//! JSON scenarios replayed against a [`DebugAbi`].
//!
//! A scenario is a list of steps tagged by `op`. Handles are referred to by
//! the name they were bound to when opened; `#<n>` names a raw id that was
//! never bound (for probing unknown handles). Expectation mismatches are
//! collected as failures and the run carries on; only malformed scenarios and
//! tracker errors abort it.
//!
//! ```json
//! {
//!   "name": "double_close",
//!   "queue_max_size": 4,
//!   "steps": [
//!     { "op": "open", "name": "a", "value": "spam" },
//!     { "op": "close", "handle": "a" },
//!     { "op": "close", "handle": "a", "expect": "use_after_close" },
//!     { "op": "expect_reports", "total": 1 }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use handlegate_abi::DebugAbi;
use handlegate_membrane::config::clamp_capacity;
use handlegate_membrane::{
    BASE_GENERATION, CloseOutcome, DebugConfig, DebugLevel, Generation, HandleId, HandleRecord,
    MetricsSnapshot, TrackerError, ValidationResult,
};

use crate::capture::InvalidHandleCapture;
use crate::structured_log::{LogEmitter, LogLevel, Outcome};

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid scenario JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("step {step}: no handle bound to '{name}'")]
    UnboundHandle { step: usize, name: String },
    #[error("step {step}: no generation labelled '{label}'")]
    UnknownGeneration { step: usize, label: String },
    #[error("step {step}: tracker error")]
    Tracker {
        step: usize,
        #[source]
        source: TrackerError,
    },
}

/// One scenario step.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
pub enum Step {
    /// Open a handle for `value` and bind it to `name`.
    Open { name: String, value: String },
    /// Close a handle. `expect` is the classification at close time.
    Close {
        handle: String,
        #[serde(default)]
        expect: Option<ValidationResult>,
    },
    /// Validate and read a handle's referent.
    Deref {
        handle: String,
        #[serde(default)]
        expect: Option<ValidationResult>,
        #[serde(default)]
        value: Option<String>,
    },
    /// Open a second handle to the same referent, bound to `name`.
    Dup { handle: String, name: String },
    NewGeneration {
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        expect: Option<Generation>,
    },
    SetQueueMaxSize { size: i64 },
    /// Open handles since the labelled generation, in creation order.
    ExpectOpen {
        #[serde(default)]
        since: Option<String>,
        handles: Vec<String>,
    },
    /// Quarantine contents, oldest first.
    ExpectClosed { handles: Vec<String> },
    ExpectReports {
        total: usize,
        #[serde(default)]
        use_after_close: Option<usize>,
        #[serde(default)]
        unknown: Option<usize>,
    },
    /// Direct record construction must be refused.
    ConstructRecord,
}

impl Step {
    #[must_use]
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Close { .. } => "close",
            Self::Deref { .. } => "deref",
            Self::Dup { .. } => "dup",
            Self::NewGeneration { .. } => "new_generation",
            Self::SetQueueMaxSize { .. } => "set_queue_max_size",
            Self::ExpectOpen { .. } => "expect_open",
            Self::ExpectClosed { .. } => "expect_closed",
            Self::ExpectReports { .. } => "expect_reports",
            Self::ConstructRecord => "construct_record",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Debug level, parsed loosely (`report`, `off`, ...).
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub queue_max_size: Option<i64>,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_json(json: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ScenarioError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    fn config(&self) -> DebugConfig {
        let mut config = DebugConfig::default();
        if let Some(mode) = &self.mode {
            config = config.with_level(DebugLevel::from_str_loose(mode));
        }
        if let Some(size) = self.queue_max_size {
            config = config.with_closed_handles_queue_max_size(clamp_capacity(size));
        }
        config
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub step: usize,
    pub op: String,
    pub message: String,
}

/// Machine-readable result of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub steps: usize,
    pub passed: bool,
    pub failures: Vec<StepFailure>,
    pub invalid_handle_reports: usize,
    pub metrics: MetricsSnapshot,
    pub open_released: usize,
    pub quarantined_released: usize,
    pub log_lines: usize,
    pub log_sha256: String,
}

struct Run<'a, W: Write> {
    abi: DebugAbi<String>,
    capture: InvalidHandleCapture,
    handles: HashMap<String, HandleId>,
    generations: HashMap<String, Generation>,
    logged_reports: usize,
    log: &'a mut LogEmitter<W>,
}

impl<W: Write> Run<'_, W> {
    fn resolve(&self, step: usize, name: &str) -> Result<HandleId, ScenarioError> {
        if let Some(id) = self.handles.get(name) {
            return Ok(*id);
        }
        name.strip_prefix('#')
            .and_then(|raw| raw.parse().ok())
            .map(HandleId::new)
            .ok_or_else(|| ScenarioError::UnboundHandle {
                step,
                name: name.to_string(),
            })
    }

    fn resolve_all(&self, step: usize, names: &[String]) -> Result<Vec<HandleId>, ScenarioError> {
        names.iter().map(|n| self.resolve(step, n)).collect()
    }

    fn generation(&self, step: usize, label: Option<&String>) -> Result<Generation, ScenarioError> {
        match label {
            None => Ok(BASE_GENERATION),
            Some(label) => {
                self.generations
                    .get(label)
                    .copied()
                    .ok_or_else(|| ScenarioError::UnknownGeneration {
                        step,
                        label: label.clone(),
                    })
            }
        }
    }

    /// Execute one step. `Ok(Some(msg))` is an expectation failure.
    fn execute(&mut self, index: usize, step: &Step) -> Result<Option<String>, ScenarioError> {
        let tracker = |source: TrackerError| ScenarioError::Tracker {
            step: index,
            source,
        };
        match step {
            Step::Open { name, value } => {
                let id = self.abi.open(value.clone()).map_err(tracker)?;
                self.handles.insert(name.clone(), id);
                Ok(None)
            }
            Step::Close { handle, expect } => {
                let id = self.resolve(index, handle)?;
                let got = match self.abi.close(id).map_err(tracker)? {
                    CloseOutcome::Closed { .. } => ValidationResult::Valid,
                    CloseOutcome::Rejected(result) => result,
                };
                Ok(check_classification(*expect, got))
            }
            Step::Deref {
                handle,
                expect,
                value,
            } => {
                let id = self.resolve(index, handle)?;
                let read = self
                    .abi
                    .with_referent(id, String::clone)
                    .map_err(tracker)?;
                let got = match read {
                    Some(_) => ValidationResult::Valid,
                    None => self.abi.with_context(|ctx| ctx.classify(id)),
                };
                if let Some(failure) = check_classification(*expect, got) {
                    return Ok(Some(failure));
                }
                match value {
                    Some(want) if read.as_ref() != Some(want) => Ok(Some(format!(
                        "expected referent {want:?}, got {read:?}"
                    ))),
                    _ => Ok(None),
                }
            }
            Step::Dup { handle, name } => {
                let id = self.resolve(index, handle)?;
                match self.abi.dup(id).map_err(tracker)? {
                    Some(new_id) => {
                        self.handles.insert(name.clone(), new_id);
                        Ok(None)
                    }
                    None => Ok(Some(format!("cannot dup invalid handle '{handle}'"))),
                }
            }
            Step::NewGeneration { label, expect } => {
                let generation = self.abi.new_generation();
                if let Some(label) = label {
                    self.generations.insert(label.clone(), generation);
                }
                Ok(expect
                    .filter(|want| *want != generation)
                    .map(|want| format!("expected generation {want}, got {generation}")))
            }
            Step::SetQueueMaxSize { size } => {
                self.abi.set_closed_handles_queue_max_size(*size);
                Ok(None)
            }
            Step::ExpectOpen { since, handles } => {
                let generation = self.generation(index, since.as_ref())?;
                let want = self.resolve_all(index, handles)?;
                let got: Vec<HandleId> = self
                    .abi
                    .get_open_handles(generation)
                    .iter()
                    .map(HandleRecord::id)
                    .collect();
                Ok(check_ids("open handles", &want, &got))
            }
            Step::ExpectClosed { handles } => {
                let want = self.resolve_all(index, handles)?;
                let got: Vec<HandleId> = self
                    .abi
                    .get_closed_handles()
                    .iter()
                    .map(HandleRecord::id)
                    .collect();
                Ok(check_ids("closed handles", &want, &got))
            }
            Step::ExpectReports {
                total,
                use_after_close,
                unknown,
            } => {
                let checks = [
                    ("total", Some(*total), self.capture.count()),
                    (
                        "use_after_close",
                        *use_after_close,
                        self.capture.count_of(ValidationResult::UseAfterClose),
                    ),
                    (
                        "unknown",
                        *unknown,
                        self.capture.count_of(ValidationResult::Unknown),
                    ),
                ];
                Ok(checks.iter().find_map(|(what, want, got)| {
                    want.filter(|w| w != got)
                        .map(|w| format!("expected {w} {what} reports, got {got}"))
                }))
            }
            Step::ConstructRecord => match HandleRecord::try_construct(HandleId::new(1)) {
                Err(TrackerError::ConstructionNotAllowed) => Ok(None),
                Err(other) => Ok(Some(format!("unexpected construction error: {other}"))),
                Ok(record) => Ok(Some(format!("record constructed directly: {record}"))),
            },
        }
    }

    fn log_new_reports(&mut self, index: usize, op: &str) -> io::Result<()> {
        for report in self.capture.since(self.logged_reports) {
            let entry = self
                .log
                .entry(LogLevel::Warn, "invalid_handle")
                .with_step(index, op)
                .with_report(&report);
            self.log.emit_entry(entry)?;
            self.logged_reports += 1;
        }
        Ok(())
    }
}

fn check_classification(want: Option<ValidationResult>, got: ValidationResult) -> Option<String> {
    want.filter(|w| *w != got).map(|w| {
        format!(
            "expected classification {}, got {}",
            w.as_str(),
            got.as_str()
        )
    })
}

fn check_ids(what: &str, want: &[HandleId], got: &[HandleId]) -> Option<String> {
    (want != got).then(|| {
        let fmt = |ids: &[HandleId]| ids.iter().map(ToString::to_string).collect::<Vec<_>>();
        format!("expected {what} {:?}, got {:?}", fmt(want), fmt(got))
    })
}

/// Replay `scenario` against a fresh session, logging every step to `log`.
pub fn run_scenario<W: Write>(
    scenario: &Scenario,
    log: &mut LogEmitter<W>,
) -> Result<ScenarioReport, ScenarioError> {
    let abi = DebugAbi::new(scenario.config());
    let capture = InvalidHandleCapture::install(&abi);

    let start = log
        .entry(LogLevel::Info, "scenario.start")
        .with_details(serde_json::json!({
            "steps": scenario.steps.len(),
            "mode": format!("{:?}", abi.level()),
            "queue_max_size": abi.get_closed_handles_queue_max_size(),
        }));
    log.emit_entry(start)?;

    let mut run = Run {
        abi,
        capture,
        handles: HashMap::new(),
        generations: HashMap::new(),
        logged_reports: 0,
        log,
    };
    let mut failures = Vec::new();

    for (index, step) in scenario.steps.iter().enumerate() {
        let op = step.op_name();
        let failure = run.execute(index, step)?;
        run.log_new_reports(index, op)?;

        let entry = run.log.entry(LogLevel::Info, &format!("step.{op}")).with_step(index, op);
        let entry = match &failure {
            None => entry.with_outcome(Outcome::Pass),
            Some(message) => {
                let mut entry = entry
                    .with_outcome(Outcome::Fail)
                    .with_details(serde_json::json!({ "message": message }));
                entry.level = LogLevel::Error;
                entry
            }
        };
        run.log.emit_entry(entry)?;

        if let Some(message) = failure {
            failures.push(StepFailure {
                step: index,
                op: op.to_string(),
                message,
            });
        }
    }

    let Run {
        abi, capture, log, ..
    } = run;
    let metrics = abi.with_context(|ctx| ctx.metrics());
    let summary = abi.teardown();
    let passed = failures.is_empty();

    let end = log
        .entry(
            if passed { LogLevel::Info } else { LogLevel::Error },
            "scenario.end",
        )
        .with_outcome(if passed { Outcome::Pass } else { Outcome::Fail })
        .with_details(serde_json::json!({
            "metrics": metrics,
            "open_released": summary.open_released,
            "quarantined_released": summary.quarantined_released,
            "release_failures": summary.release_failures,
        }));
    log.emit_entry(end)?;
    log.flush()?;

    Ok(ScenarioReport {
        scenario: scenario.name.clone(),
        steps: scenario.steps.len(),
        passed,
        failures,
        invalid_handle_reports: capture.count(),
        metrics,
        open_released: summary.open_released,
        quarantined_released: summary.quarantined_released,
        log_lines: log.lines_written(),
        log_sha256: log.sha256_hex(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(json: &str) -> ScenarioReport {
        let scenario = Scenario::from_json(json).unwrap();
        let mut log = LogEmitter::to_buffer(&scenario.name, "test");
        run_scenario(&scenario, &mut log).unwrap()
    }

    #[test]
    fn double_close_scenario_passes() {
        let report = run(r#"{
            "name": "double_close",
            "steps": [
                { "op": "open", "name": "a", "value": "spam" },
                { "op": "close", "handle": "a", "expect": "valid" },
                { "op": "close", "handle": "a", "expect": "use_after_close" },
                { "op": "expect_reports", "total": 1, "use_after_close": 1 }
            ]
        }"#);
        assert!(report.passed, "{:?}", report.failures);
        assert_eq!(report.invalid_handle_reports, 1);
        assert_eq!(report.metrics.invalid_closes, 1);
        assert_eq!(report.quarantined_released, 1);
        assert_eq!(report.log_sha256.len(), 64);
    }

    #[test]
    fn mismatches_are_collected_not_fatal() {
        let report = run(r##"{
            "name": "wrong",
            "steps": [
                { "op": "deref", "handle": "#77", "expect": "valid" },
                { "op": "new_generation", "expect": 5 },
                { "op": "expect_reports", "total": 1, "unknown": 1 }
            ]
        }"##);
        assert!(!report.passed);
        let steps: Vec<usize> = report.failures.iter().map(|f| f.step).collect();
        assert_eq!(steps, vec![0, 1]);
        assert!(report.failures[0].message.contains("unknown"));
    }

    #[test]
    fn unbound_handle_aborts_the_run() {
        let scenario = Scenario::from_json(
            r#"{ "name": "x", "steps": [ { "op": "close", "handle": "nope" } ] }"#,
        )
        .unwrap();
        let mut log = LogEmitter::to_buffer("x", "test");
        let err = run_scenario(&scenario, &mut log).unwrap_err();
        assert!(matches!(err, ScenarioError::UnboundHandle { step: 0, .. }));
    }

    #[test]
    fn unknown_op_is_rejected_at_parse_time() {
        let err = Scenario::from_json(r#"{ "name": "x", "steps": [ { "op": "fly" } ] }"#);
        assert!(matches!(err, Err(ScenarioError::Json(_))));
    }

    #[test]
    fn log_has_one_line_per_step_plus_reports() {
        let scenario = Scenario::from_json(
            r#"{
                "name": "lines",
                "steps": [
                    { "op": "open", "name": "a", "value": "v" },
                    { "op": "close", "handle": "a" },
                    { "op": "deref", "handle": "a", "expect": "use_after_close" }
                ]
            }"#,
        )
        .unwrap();
        let mut log = LogEmitter::to_buffer("lines", "test");
        let report = run_scenario(&scenario, &mut log).unwrap();
        // start + 3 steps + 1 invalid_handle + end
        assert_eq!(report.log_lines, 6);

        let text = String::from_utf8(log.into_inner()).unwrap();
        let events: Vec<String> = text
            .lines()
            .map(|l| {
                crate::structured_log::validate_log_line(l, 0)
                    .unwrap()
                    .event
            })
            .collect();
        assert_eq!(
            events,
            vec![
                "scenario.start",
                "step.open",
                "step.close",
                "invalid_handle",
                "step.deref",
                "scenario.end"
            ]
        );
    }
}
