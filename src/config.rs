use crate::error::{AfResult, ArrayForgeError};
use crate::optimizer::checkpoint;
use crate::results::favorite_path;
use clap::Args;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RangeSpec {
    Fixed {
        min: f64,
        max: f64,
    },
    /// Bounds derived from an engineering value held by the scenario.
    Multiplier {
        variable: String,
        min_multiplier: f64,
        max_multiplier: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InterpSpec {
    Fixed { values: Vec<f64> },
    Range { delta: f64 },
}

/// One searchable or fixed layout parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSpec {
    pub fixed: Option<f64>,
    pub range: Option<RangeSpec>,
    pub x0: Option<f64>,
    pub integer: bool,
    pub interp: Option<InterpSpec>,
}

impl ParameterSpec {
    pub fn fixed(value: f64) -> Self {
        Self {
            fixed: Some(value),
            ..Default::default()
        }
    }

    pub fn range(min: f64, max: f64) -> Self {
        Self {
            range: Some(RangeSpec::Fixed { min, max }),
            ..Default::default()
        }
    }
}

fn default_tolfun() -> f64 {
    1e-11
}

fn default_pause_file() -> String {
    "pause".to_string()
}

fn default_modules() -> Vec<String> {
    vec!["layout".to_string()]
}

/// Run configuration document. Required keys are optional here so that
/// incomplete documents can be loaded and reported on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimiserConfig {
    #[serde(default)]
    pub root_project_path: Option<PathBuf>,
    #[serde(default)]
    pub worker_dir: Option<PathBuf>,
    #[serde(default)]
    pub base_penalty: Option<f64>,
    #[serde(default)]
    pub n_threads: Option<usize>,
    #[serde(default)]
    pub parameters: Option<BTreeMap<String, ParameterSpec>>,
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default)]
    pub results_params: Vec<String>,
    #[serde(default)]
    pub clean_existing_dir: bool,
    #[serde(default)]
    pub max_simulations: Option<usize>,
    #[serde(default)]
    pub popsize: Option<usize>,
    #[serde(default)]
    pub max_generations: Option<usize>,
    #[serde(default = "default_tolfun")]
    pub tolfun: f64,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub min_evals: Option<usize>,
    #[serde(default)]
    pub max_evals: Option<usize>,
    #[serde(default)]
    pub maximise: bool,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub worker_command: Option<Vec<String>>,
    #[serde(default = "default_pause_file")]
    pub pause_file: String,
    #[serde(default = "default_modules")]
    pub scenario_modules: Vec<String>,
}

impl Default for OptimiserConfig {
    fn default() -> Self {
        Self {
            root_project_path: None,
            worker_dir: None,
            base_penalty: None,
            n_threads: None,
            parameters: None,
            objective: None,
            results_params: Vec::new(),
            clean_existing_dir: false,
            max_simulations: None,
            popsize: None,
            max_generations: None,
            tolfun: default_tolfun(),
            timeout_secs: None,
            min_evals: None,
            max_evals: None,
            maximise: false,
            seed: None,
            worker_command: None,
            pause_file: default_pause_file(),
            scenario_modules: default_modules(),
        }
    }
}

pub const REQUIRED_KEYS: [&str; 6] = [
    "root_project_path",
    "worker_dir",
    "base_penalty",
    "n_threads",
    "parameters",
    "objective",
];

impl OptimiserConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> AfResult<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ArrayForgeError::Configuration(format!(
                "Failed to read config '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ArrayForgeError::Configuration(format!("Failed to parse config JSON: {}", e))
        })
    }

    /// Writes the document with `clean_existing_dir` cleared so a reloaded
    /// copy cannot wipe a finished run.
    pub fn dump<P: AsRef<Path>>(&self, path: P) -> AfResult<()> {
        let mut copy = self.clone();
        copy.clean_existing_dir = false;
        fs::write(path, serde_json::to_string_pretty(&copy)?)?;
        Ok(())
    }

    pub fn missing_keys(&self) -> Vec<&'static str> {
        let present = [
            self.root_project_path.is_some(),
            self.worker_dir.is_some(),
            self.base_penalty.is_some(),
            self.n_threads.is_some(),
            self.parameters.is_some(),
            self.objective.is_some(),
        ];
        REQUIRED_KEYS
            .iter()
            .zip(present)
            .filter(|(_, ok)| !ok)
            .map(|(k, _)| *k)
            .collect()
    }

    /// Pause sentinel location inside the worker directory.
    pub fn pause_path(&self) -> Option<PathBuf> {
        self.worker_dir.as_ref().map(|d| d.join(&self.pause_file))
    }

    /// File stem shared by every artifact of the run.
    pub fn root_name(&self) -> String {
        self.root_project_path
            .as_ref()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().trim_end_matches(".scenario").to_string())
            .unwrap_or_else(|| "project".to_string())
    }
}

/// Validated settings for one optimisation run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub root_project_path: PathBuf,
    pub root_name: String,
    pub worker_dir: PathBuf,
    pub base_penalty: f64,
    pub n_threads: usize,
    pub parameters: BTreeMap<String, ParameterSpec>,
    pub objective: String,
    pub results_params: Vec<String>,
    pub clean_existing_dir: bool,
    pub max_simulations: Option<usize>,
    pub popsize: Option<usize>,
    pub max_generations: Option<usize>,
    pub tolfun: f64,
    pub timeout_secs: Option<u64>,
    pub min_evals: usize,
    pub max_evals: Option<usize>,
    pub maximise: bool,
    pub seed: Option<u64>,
    pub worker_command: Vec<String>,
    pub pause_path: PathBuf,
    pub scenario_modules: Vec<String>,
}

fn default_worker_command() -> AfResult<Vec<String>> {
    let exe = std::env::current_exe().map_err(|e| {
        ArrayForgeError::Configuration(format!("Cannot locate worker executable: {}", e))
    })?;
    Ok(vec![exe.to_string_lossy().to_string(), "worker".to_string()])
}

impl TryFrom<&OptimiserConfig> for RunOptions {
    type Error = ArrayForgeError;

    fn try_from(cfg: &OptimiserConfig) -> AfResult<Self> {
        let missing = cfg.missing_keys();
        if !missing.is_empty() {
            return Err(ArrayForgeError::Configuration(format!(
                "Missing required keys: {}",
                missing.join(", ")
            )));
        }

        let required = |what: &str| {
            ArrayForgeError::Configuration(format!("Missing required key: {}", what))
        };
        let worker_dir = cfg.worker_dir.clone().ok_or_else(|| required("worker_dir"))?;
        let n_threads = cfg.n_threads.ok_or_else(|| required("n_threads"))?;
        if n_threads == 0 {
            return Err(ArrayForgeError::Configuration(
                "n_threads must be at least 1".to_string(),
            ));
        }
        let base_penalty = cfg.base_penalty.ok_or_else(|| required("base_penalty"))?;
        if !base_penalty.is_finite() {
            return Err(ArrayForgeError::Configuration(
                "base_penalty must be finite".to_string(),
            ));
        }

        let worker_command = match &cfg.worker_command {
            Some(cmd) if !cmd.is_empty() => cmd.clone(),
            Some(_) => {
                return Err(ArrayForgeError::Configuration(
                    "worker_command must name a program".to_string(),
                ))
            }
            None => default_worker_command()?,
        };

        Ok(Self {
            root_project_path: cfg
                .root_project_path
                .clone()
                .ok_or_else(|| required("root_project_path"))?,
            root_name: cfg.root_name(),
            pause_path: worker_dir.join(&cfg.pause_file),
            worker_dir,
            base_penalty,
            n_threads,
            parameters: cfg.parameters.clone().ok_or_else(|| required("parameters"))?,
            objective: cfg.objective.clone().ok_or_else(|| required("objective"))?,
            results_params: cfg.results_params.clone(),
            clean_existing_dir: cfg.clean_existing_dir,
            max_simulations: cfg.max_simulations,
            popsize: cfg.popsize,
            max_generations: cfg.max_generations,
            tolfun: cfg.tolfun,
            timeout_secs: cfg.timeout_secs,
            min_evals: cfg.min_evals.unwrap_or(1).max(1),
            max_evals: cfg.max_evals,
            maximise: cfg.maximise,
            seed: cfg.seed,
            worker_command,
            scenario_modules: cfg.scenario_modules.clone(),
        })
    }
}

/// Command line overrides applied on top of the configuration file.
#[derive(Args, Debug, Clone, Default)]
pub struct RunOverrides {
    #[arg(long)]
    pub n_threads: Option<usize>,
    #[arg(long)]
    pub max_simulations: Option<usize>,
    #[arg(long)]
    pub popsize: Option<usize>,
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long, default_value_t = false)]
    pub clean_existing_dir: bool,
}

impl RunOverrides {
    pub fn apply(&self, cfg: &mut OptimiserConfig) {
        if let Some(n) = self.n_threads {
            cfg.n_threads = Some(n);
        }
        if let Some(n) = self.max_simulations {
            cfg.max_simulations = Some(n);
        }
        if let Some(n) = self.popsize {
            cfg.popsize = Some(n);
        }
        if let Some(s) = self.seed {
            cfg.seed = Some(s);
        }
        if self.clean_existing_dir {
            cfg.clean_existing_dir = true;
        }
    }
}

pub fn config_status(cfg: &OptimiserConfig) -> (String, u8) {
    let missing = cfg.missing_keys();
    let project_ok = cfg
        .root_project_path
        .as_ref()
        .map(|p| p.exists())
        .unwrap_or(false);

    if missing.is_empty() && project_ok {
        ("Configuration complete".to_string(), 1)
    } else {
        ("Configuration incomplete".to_string(), 0)
    }
}

pub fn worker_dir_status(cfg: &OptimiserConfig) -> (String, u8) {
    let Some(dir) = &cfg.worker_dir else {
        return ("Worker directory not set".to_string(), 0);
    };

    if !dir.exists() {
        return ("Worker directory does not yet exist".to_string(), 1);
    }

    let has_files = fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false);

    if !has_files {
        return ("Worker directory is empty".to_string(), 1);
    }

    if cfg.clean_existing_dir {
        warn!("Files in worker directory {} will be deleted", dir.display());
        ("Worker directory contains files (will be deleted)".to_string(), 2)
    } else {
        ("Worker directory contains files".to_string(), 0)
    }
}

pub fn optimiser_status(cfg: &OptimiserConfig) -> (Option<String>, u8) {
    let Some(dir) = &cfg.worker_dir else {
        return (None, 0);
    };

    if favorite_path(dir, &cfg.root_name()).exists() {
        return (Some("Optimisation complete".to_string()), 1);
    }

    if checkpoint::exists(dir) {
        return (
            Some("Optimisation incomplete (restart may be possible)".to_string()),
            2,
        );
    }

    (None, 0)
}
