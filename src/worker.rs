use crate::error::{AfResult, ArrayForgeError};
use crate::geometry::{LayoutParameters, Positioner};
use crate::optimizer::cache::nullable_f64;
use crate::scenario::{DataStore, Scenario};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use strum_macros::Display;
use tracing::{debug, info};

pub const RESULTS_CONTROL_FILE: &str = "results_control.json";
pub const SCENARIO_SUFFIX: &str = ".scenario.json";
pub const RESULT_SUFFIX: &str = ".result.json";
pub const FAVORITE_TAG: &str = "favorite";

pub fn scenario_path(dir: &Path, root: &str, tag: &str) -> PathBuf {
    dir.join(format!("{}_{}{}", root, tag, SCENARIO_SUFFIX))
}

pub fn result_path(dir: &Path, root: &str, tag: &str) -> PathBuf {
    dir.join(format!("{}_{}{}", root, tag, RESULT_SUFFIX))
}

/// Output artifact that sits next to a worker input artifact.
pub fn result_path_for(scenario: &Path) -> PathBuf {
    let name = scenario
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = name.strip_suffix(SCENARIO_SUFFIX).unwrap_or(&name);
    scenario.with_file_name(format!("{}{}", stem, RESULT_SUFFIX))
}

/// Evaluation index encoded in an artifact file name, if any.
pub fn artifact_index(file_name: &str, root: &str) -> Option<u64> {
    let rest = file_name.strip_prefix(root)?.strip_prefix('_')?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() || !rest[digits.len()..].starts_with('.') {
        return None;
    }
    digits.parse().ok()
}

/// Variables every worker must report back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsControl {
    pub objective: String,
    #[serde(default)]
    pub results_params: Vec<String>,
    #[serde(default)]
    pub modules: Vec<String>,
}

impl ResultsControl {
    pub fn load(dir: &Path) -> AfResult<Self> {
        let content = fs::read_to_string(dir.join(RESULTS_CONTROL_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, dir: &Path) -> AfResult<()> {
        fs::write(
            dir.join(RESULTS_CONTROL_FILE),
            serde_json::to_string_pretty(self)?,
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum WorkerStatus {
    Success,
    Exception,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct ResultValue(#[serde(with = "nullable_f64")] f64);

/// Output artifact written by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    pub status: WorkerStatus,
    #[serde(default)]
    pub params: Vec<f64>,
    #[serde(default)]
    results: BTreeMap<String, ResultValue>,
    #[serde(default)]
    pub error: Option<String>,
}

impl WorkerResult {
    pub fn success(params: Vec<f64>, results: BTreeMap<String, f64>) -> Self {
        Self {
            status: WorkerStatus::Success,
            params,
            results: results.into_iter().map(|(k, v)| (k, ResultValue(v))).collect(),
            error: None,
        }
    }

    pub fn exception(params: Vec<f64>, message: impl Into<String>) -> Self {
        Self {
            status: WorkerStatus::Exception,
            params,
            results: BTreeMap::new(),
            error: Some(message.into()),
        }
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.results.get(name).map(|v| v.0)
    }

    pub fn values(&self) -> BTreeMap<String, f64> {
        self.results.iter().map(|(k, v)| (k.clone(), v.0)).collect()
    }

    pub fn load(path: &Path) -> AfResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| ArrayForgeError::ResultParse(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| ArrayForgeError::ResultParse(format!("{}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> AfResult<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Process arguments for one worker invocation, after the worker command.
pub fn worker_args(scenario: &Path, params: &LayoutParameters, n_evals: Option<usize>) -> Vec<String> {
    let mut args = vec![
        scenario.to_string_lossy().to_string(),
        params.array_orientation.to_string(),
        params.delta_row.to_string(),
        params.delta_col.to_string(),
        params.n_nodes.to_string(),
        params.t1.to_string(),
        params.t2.to_string(),
    ];
    if let Some(d) = params.dev_per_string {
        args.push("--dev-per-string".to_string());
        args.push(d.to_string());
    }
    if let Some(n) = n_evals {
        args.push("--n-evals".to_string());
        args.push(n.to_string());
    }
    args
}

/// Runs named simulation modules over a scenario.
pub trait ScenarioRunner {
    fn run(&self, scenario: &mut Scenario, modules: &[String]) -> AfResult<()>;
}

/// Deterministic stand-in for the physical simulation: each device yields
/// its rated output reduced by proximity to its neighbours.
#[derive(Debug, Clone, Copy, Default)]
pub struct SurrogateRunner;

impl SurrogateRunner {
    fn run_layout(&self, scenario: &mut Scenario) -> AfResult<()> {
        let layout = scenario
            .layout
            .clone()
            .ok_or_else(|| ArrayForgeError::Simulation("Scenario has no layout".to_string()))?;

        let rated = scenario.get_number("device.rated_power").unwrap_or(1.0);
        let capacity = scenario.get_number("capacity_factor").unwrap_or(0.35);
        let (sx, sy) = scenario.site.min_separation;
        let length = 3.0 * sx.max(sy);

        let mut energy = 0.0;
        for (i, &(xi, yi)) in layout.iter().enumerate() {
            let mut yield_factor = 1.0;
            for (j, &(xj, yj)) in layout.iter().enumerate() {
                if i != j {
                    let d = (xi - xj).hypot(yi - yj);
                    yield_factor *= 1.0 - 0.1 * (-d / length).exp();
                }
            }
            energy += rated * 8760.0 * capacity * yield_factor;
        }

        let mean_depth = match &scenario.site.bathymetry {
            Some(b) if !layout.is_empty() => {
                let depths: Vec<f64> = layout.iter().filter_map(|&(x, y)| b.depth_at(x, y)).collect();
                if depths.is_empty() {
                    0.0
                } else {
                    depths.iter().sum::<f64>() / depths.len() as f64
                }
            }
            _ => 0.0,
        };

        scenario.set_value("annual_energy", Value::from(energy));
        scenario.set_value("n_devices", Value::from(layout.len()));
        scenario.set_value("mean_depth", Value::from(mean_depth));
        Ok(())
    }
}

impl ScenarioRunner for SurrogateRunner {
    fn run(&self, scenario: &mut Scenario, modules: &[String]) -> AfResult<()> {
        for module in modules {
            match module.as_str() {
                "layout" => self.run_layout(scenario)?,
                other => {
                    return Err(ArrayForgeError::Simulation(format!(
                        "Unknown module '{}'",
                        other
                    )))
                }
            }
        }
        Ok(())
    }
}

fn evaluate(
    scenario_file: &Path,
    params: &LayoutParameters,
    n_evals: usize,
    control: &ResultsControl,
    runner: &dyn ScenarioRunner,
) -> AfResult<BTreeMap<String, f64>> {
    let mut scenario = Scenario::load(scenario_file)?;
    let positions = Positioner::new(&scenario.site)?.place(params)?;
    scenario.layout = Some(positions.iter().map(|c| (c.x, c.y)).collect());

    let mut names = vec![control.objective.clone()];
    names.extend(control.results_params.iter().cloned());
    let mut sums: BTreeMap<String, f64> = BTreeMap::new();

    for _ in 0..n_evals.max(1) {
        let mut run = scenario.clone();
        runner.run(&mut run, &control.modules)?;
        for name in &names {
            let value = run.get_number(name).map_err(|_| {
                ArrayForgeError::Simulation(format!("Variable '{}' was not produced", name))
            })?;
            *sums.entry(name.clone()).or_insert(0.0) += value;
        }
    }

    let n = n_evals.max(1) as f64;
    Ok(sums.into_iter().map(|(k, v)| (k, v / n)).collect())
}

/// Worker entry point. Simulation failures are written to the result
/// artifact; only failing to write that artifact is an error.
pub fn run_worker(
    scenario_file: &Path,
    params: &LayoutParameters,
    n_evals: Option<usize>,
    runner: &dyn ScenarioRunner,
) -> AfResult<WorkerStatus> {
    let dir = scenario_file.parent().unwrap_or_else(|| Path::new("."));
    let out = result_path_for(scenario_file);
    info!("Worker evaluating {}", scenario_file.display());

    let outcome = ResultsControl::load(dir)
        .and_then(|control| evaluate(scenario_file, params, n_evals.unwrap_or(1), &control, runner));

    let result = match outcome {
        Ok(values) => WorkerResult::success(params.to_vec(), values),
        Err(e) => {
            debug!("Worker exception: {}", e);
            WorkerResult::exception(params.to_vec(), e.to_string())
        }
    };
    result.save(&out)?;
    Ok(result.status)
}
