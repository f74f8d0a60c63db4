use super::cache::{EvaluationCache, EvaluationRecord, EvaluationStatus};
use crate::error::{AfResult, ArrayForgeError};
use crate::geometry::{LayoutParameters, Positioner};
use crate::scenario::Scenario;
use crate::tools::{ConstraintTool, SpacingCheck};
use crate::worker::{self, WorkerResult, WorkerStatus, FAVORITE_TAG};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub const VIOLATION_LOG_FILE: &str = "violations.txt";

/// Terminal state of one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(f64),
    Rejected { reason: String, penalty: f64 },
    FailSend(String),
    FailExecute(String),
    FailReceive(String),
    Exception(String),
}

impl Outcome {
    /// Cost as recorded. Only `Exception` yields NaN.
    pub fn cost(&self, base_penalty: f64) -> f64 {
        match self {
            Self::Success(cost) => *cost,
            Self::Rejected { penalty, .. } => *penalty,
            Self::FailSend(_) | Self::FailExecute(_) | Self::FailReceive(_) => base_penalty,
            Self::Exception(_) => f64::NAN,
        }
    }

    pub fn status(&self) -> EvaluationStatus {
        match self {
            Self::Success(_) => EvaluationStatus::Success,
            Self::Rejected { .. } => EvaluationStatus::Rejected,
            Self::FailSend(_) => EvaluationStatus::FailSend,
            Self::FailExecute(_) => EvaluationStatus::FailExecute,
            Self::FailReceive(_) => EvaluationStatus::FailReceive,
            Self::Exception(_) => EvaluationStatus::Exception,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Rejected { reason, .. } => Some(reason),
            Self::FailSend(m)
            | Self::FailExecute(m)
            | Self::FailReceive(m)
            | Self::Exception(m) => Some(m),
        }
    }
}

/// Append-only, human readable log of rejected candidates.
#[derive(Debug)]
pub struct ViolationLog {
    file: Mutex<File>,
    path: PathBuf,
}

pub fn format_params(params: &[f64]) -> String {
    params
        .iter()
        .zip(LayoutParameters::NAMES)
        .map(|(v, name)| format!("{}={}", name, v))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ViolationLog {
    pub fn open(path: &Path) -> AfResult<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self, tag: &str, reason: &str, params: &[f64]) {
        let line = format!("{}: {}; params: {}\n", tag, reason, format_params(params));
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = file.write_all(line.as_bytes()).and_then(|_| file.flush()) {
            warn!("Failed to write violation log {}: {}", self.path.display(), e);
        }
    }
}

/// Starts the external worker and waits for it to exit.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, args: &[String]) -> AfResult<()>;
}

/// Launches `program leading_args... args...` as a child process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    command: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, args: &[String]) -> AfResult<()> {
        let (program, leading) = self.command.split_first().ok_or_else(|| {
            ArrayForgeError::WorkerLaunch {
                code: None,
                message: "Empty worker command".to_string(),
            }
        })?;

        let output = Command::new(program)
            .args(leading)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| ArrayForgeError::WorkerLaunch {
                code: None,
                message: format!("{}: {}", program, e),
            })?;

        if !output.status.success() {
            return Err(ArrayForgeError::WorkerLaunch {
                code: output.status.code(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Input artifact of one evaluation; removed on every exit path.
struct Workspace {
    input: PathBuf,
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.input.exists() {
            if let Err(e) = fs::remove_file(&self.input) {
                warn!("Failed to remove {}: {}", self.input.display(), e);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub index: Option<u64>,
    pub params: Vec<f64>,
    pub cost: f64,
    pub outcome: Option<Outcome>,
}

impl Evaluation {
    pub fn is_cached(&self) -> bool {
        self.outcome.is_none()
    }
}

pub struct EvaluatorSettings {
    pub root: String,
    pub worker_dir: PathBuf,
    pub base_penalty: f64,
    pub objective: String,
    pub maximise: bool,
}

/// Runs one candidate from cache lookup to recorded cost.
pub struct Evaluator {
    settings: EvaluatorSettings,
    scenario: Arc<Scenario>,
    positioner: Positioner,
    cache: Arc<EvaluationCache>,
    violations: Arc<ViolationLog>,
    launcher: Box<dyn WorkerLauncher>,
}

impl Evaluator {
    pub fn new(
        settings: EvaluatorSettings,
        scenario: Arc<Scenario>,
        cache: Arc<EvaluationCache>,
        violations: Arc<ViolationLog>,
        launcher: Box<dyn WorkerLauncher>,
    ) -> AfResult<Self> {
        let positioner = Positioner::new(&scenario.site)?;
        Ok(Self {
            settings,
            scenario,
            positioner,
            cache,
            violations,
            launcher,
        })
    }

    pub fn cache(&self) -> &Arc<EvaluationCache> {
        &self.cache
    }

    pub fn base_penalty(&self) -> f64 {
        self.settings.base_penalty
    }

    /// Cheap feasibility check ahead of dispatch. Returns the rejection
    /// reason and its penalty.
    pub fn pre_constraints(&self, params: &[f64]) -> Option<(String, f64)> {
        let base = self.settings.base_penalty;
        let layout = match LayoutParameters::from_slice(params) {
            Ok(l) => l,
            Err(e) => return Some((e.to_string(), base)),
        };

        let positions = match self.positioner.place(&layout) {
            Ok(p) => p,
            Err(e) => {
                let penalty = match &e {
                    ArrayForgeError::InsufficientNodes { expected, found } => {
                        base * (1 + expected.saturating_sub(*found)) as f64
                    }
                    _ => base,
                };
                return Some((e.to_string(), penalty));
            }
        };

        let mut check = SpacingCheck::new();
        check.configure(&positions);
        match check.execute(&self.scenario.site) {
            Ok(()) => None,
            Err(ArrayForgeError::SpacingViolation { count }) => Some((
                ArrayForgeError::SpacingViolation { count }.to_string(),
                base * (1 + count) as f64,
            )),
            Err(e) => Some((e.to_string(), base)),
        }
    }

    fn dispatch(&self, tag: &str, params: &[f64], n_evals: Option<usize>) -> (Outcome, PathBuf, PathBuf) {
        let dir = &self.settings.worker_dir;
        let input = worker::scenario_path(dir, &self.settings.root, tag);
        let output = worker::result_path(dir, &self.settings.root, tag);
        let workspace = Workspace {
            input: input.clone(),
        };

        let outcome = self.run_worker(&workspace.input, &output, params, n_evals);
        drop(workspace);
        (outcome, input, output)
    }

    fn run_worker(&self, input: &Path, output: &Path, params: &[f64], n_evals: Option<usize>) -> Outcome {
        let layout = match LayoutParameters::from_slice(params) {
            Ok(l) => l,
            Err(e) => return Outcome::FailSend(e.to_string()),
        };

        // 1. Send
        if let Err(e) = self.scenario.dump_for_worker(input) {
            return Outcome::FailSend(e.to_string());
        }

        // 2. Execute
        let args = worker::worker_args(input, &layout, n_evals);
        if let Err(e) = self.launcher.launch(&args) {
            return Outcome::FailExecute(e.to_string());
        }

        // 3. Receive
        let result = match WorkerResult::load(output) {
            Ok(r) => r,
            Err(e) => return Outcome::FailReceive(e.to_string()),
        };

        match result.status {
            WorkerStatus::Exception => {
                Outcome::Exception(result.error.unwrap_or_else(|| "Unknown exception".to_string()))
            }
            WorkerStatus::Success => match result.value(&self.settings.objective) {
                Some(v) if v.is_finite() => {
                    Outcome::Success(if self.settings.maximise { -v } else { v })
                }
                Some(v) => Outcome::Exception(format!(
                    "Objective '{}' is not a finite number: {}",
                    self.settings.objective, v
                )),
                None => Outcome::FailReceive(format!(
                    "Objective '{}' missing from {}",
                    self.settings.objective,
                    output.display()
                )),
            },
        }
    }

    fn run_candidate(&self, tag: &str, params: &[f64], n_evals: Option<usize>) -> (Outcome, Option<PathBuf>, Option<PathBuf>) {
        if let Some((reason, penalty)) = self.pre_constraints(params) {
            debug!("Candidate {} rejected: {}", tag, reason);
            self.violations.log(tag, &reason, params);
            return (Outcome::Rejected { reason, penalty }, None, None);
        }

        let (outcome, input, output) = self.dispatch(tag, params, n_evals);
        if let Outcome::FailSend(m) | Outcome::FailExecute(m) | Outcome::FailReceive(m) = &outcome {
            warn!("Evaluation {} failed ({}): {}", tag, outcome.status(), m);
        }
        (outcome, Some(input), Some(output))
    }

    /// Evaluates a fully resolved parameter vector. Identical vectors already
    /// in the ledger are answered from it without consuming an index.
    pub fn evaluate(&self, params: &[f64], n_evals: Option<usize>) -> AfResult<Evaluation> {
        if let Some(cost) = self.cache.lookup_cost(params) {
            return Ok(Evaluation {
                index: None,
                params: params.to_vec(),
                cost,
                outcome: None,
            });
        }

        let index = self.cache.next_index();
        let (outcome, input_path, output_path) =
            self.run_candidate(&index.to_string(), params, n_evals);
        let cost = outcome.cost(self.settings.base_penalty);

        self.cache.record(EvaluationRecord {
            index,
            params: params.to_vec(),
            cost,
            status: outcome.status(),
            input_path,
            output_path,
            message: outcome.message().map(str::to_string),
        })?;

        Ok(Evaluation {
            index: Some(index),
            params: params.to_vec(),
            cost,
            outcome: Some(outcome),
        })
    }

    /// Re-runs a solution outside the ledger under the favorite name. A
    /// result artifact is always left behind.
    pub fn evaluate_favorite(&self, params: &[f64], n_evals: Option<usize>) -> AfResult<Evaluation> {
        let (outcome, _, output) = self.run_candidate(FAVORITE_TAG, params, n_evals);
        let output = output.unwrap_or_else(|| {
            worker::result_path(&self.settings.worker_dir, &self.settings.root, FAVORITE_TAG)
        });

        match &outcome {
            Outcome::Success(_) | Outcome::Exception(_) => {}
            other => {
                let message = format!("{}: {}", other.status(), other.message().unwrap_or(""));
                WorkerResult::exception(params.to_vec(), message).save(&output)?;
            }
        }

        Ok(Evaluation {
            index: None,
            params: params.to_vec(),
            cost: outcome.cost(self.settings.base_penalty),
            outcome: Some(outcome),
        })
    }
}
