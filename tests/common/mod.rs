#![allow(dead_code)]

use arrayforge::config::{OptimiserConfig, ParameterSpec, RunOptions};
use arrayforge::error::{AfResult, ArrayForgeError};
use arrayforge::optimizer::WorkerLauncher;
use arrayforge::scenario::{Scenario, SiteModel};
use arrayforge::worker::{result_path_for, WorkerResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

pub const BASE_PENALTY: f64 = 1e6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FakeMode {
    Succeed,
    FailExit,
    NoOutput,
    Exception,
    MissingObjective,
}

/// Stands in for the worker process: writes a result next to the input
/// and counts invocations.
#[derive(Debug, Clone)]
pub struct FakeLauncher {
    pub calls: Arc<AtomicUsize>,
    pub inputs_seen: Arc<AtomicUsize>,
    pub mode: FakeMode,
}

impl FakeLauncher {
    pub fn new(mode: FakeMode) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            inputs_seen: Arc::new(AtomicUsize::new(0)),
            mode,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Deterministic objective: prefers wide spacing near the middle of the
/// unit parameters.
pub fn fake_energy(params: &[f64]) -> f64 {
    params[1] + params[2] - 100.0 * (params[4] - 0.5).powi(2)
}

impl WorkerLauncher for FakeLauncher {
    fn launch(&self, args: &[String]) -> AfResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scenario = PathBuf::from(&args[0]);
        if scenario.exists() {
            self.inputs_seen.fetch_add(1, Ordering::SeqCst);
        }
        let params: Vec<f64> = args[1..7].iter().map(|a| a.parse().unwrap()).collect();
        let out = result_path_for(&scenario);

        match self.mode {
            FakeMode::Succeed => {
                let mut values = BTreeMap::new();
                values.insert("annual_energy".to_string(), fake_energy(&params));
                values.insert("n_devices".to_string(), params[3]);
                WorkerResult::success(params, values).save(&out)
            }
            FakeMode::MissingObjective => {
                let mut values = BTreeMap::new();
                values.insert("n_devices".to_string(), params[3]);
                WorkerResult::success(params, values).save(&out)
            }
            FakeMode::Exception => WorkerResult::exception(params, "solver diverged").save(&out),
            FakeMode::FailExit => Err(ArrayForgeError::WorkerLaunch {
                code: Some(3),
                message: "boom".to_string(),
            }),
            FakeMode::NoOutput => Ok(()),
        }
    }
}

pub fn site() -> SiteModel {
    SiteModel::rectangle(900.0, 200.0, (50.0, 50.0))
}

pub fn scenario() -> Scenario {
    Scenario::new(site())
}

/// Feasible physical parameters on the 900 x 200 site.
pub fn feasible_params() -> Vec<f64> {
    vec![std::f64::consts::FRAC_PI_2, 60.0, 60.0, 5.0, 0.5, 0.5]
}

pub fn parameters() -> BTreeMap<String, ParameterSpec> {
    let mut p = BTreeMap::new();
    p.insert("grid_orientation".to_string(), ParameterSpec::fixed(0.0));
    p.insert("delta_row".to_string(), ParameterSpec::range(50.0, 150.0));
    p.insert("delta_col".to_string(), ParameterSpec::range(50.0, 150.0));
    p.insert("n_nodes".to_string(), ParameterSpec::fixed(5.0));
    p.insert("t1".to_string(), ParameterSpec::range(0.0, 1.0));
    p.insert("t2".to_string(), ParameterSpec::fixed(0.5));
    p
}

pub struct TestContext {
    pub dir: TempDir,
    pub project: PathBuf,
    pub worker_dir: PathBuf,
}

impl TestContext {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let project = dir.path().join("farm.scenario.json");
        scenario().save(&project).unwrap();
        let worker_dir = dir.path().join("work");
        Self {
            dir,
            project,
            worker_dir,
        }
    }

    pub fn config(&self) -> OptimiserConfig {
        OptimiserConfig {
            root_project_path: Some(self.project.clone()),
            worker_dir: Some(self.worker_dir.clone()),
            base_penalty: Some(BASE_PENALTY),
            n_threads: Some(2),
            parameters: Some(parameters()),
            objective: Some("annual_energy".to_string()),
            results_params: vec!["n_devices".to_string()],
            max_simulations: Some(8),
            popsize: Some(4),
            maximise: true,
            seed: Some(7),
            worker_command: Some(vec!["unused".to_string()]),
            ..Default::default()
        }
    }

    pub fn options(&self) -> RunOptions {
        RunOptions::try_from(&self.config()).unwrap()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

pub fn files_matching(dir: &Path, needle: &str) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|n| n.contains(needle))
        .collect()
}
