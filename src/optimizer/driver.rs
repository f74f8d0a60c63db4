use super::cache::{same_params, EvaluationCache, EvaluationRecord, EvaluationStatus};
use super::checkpoint;
use super::cma::{CmaEs, CmaOptions, StopReason};
use super::control::RunControl;
use super::evaluator::{
    Evaluation, Evaluator, EvaluatorSettings, ProcessLauncher, ViolationLog, WorkerLauncher,
    VIOLATION_LOG_FILE,
};
use super::noise::NoiseHandler;
use super::params::ParamControl;
use super::pool::WorkerPool;
use crate::config::RunOptions;
use crate::error::{AfResult, ArrayForgeError};
use crate::scenario::Scenario;
use crate::worker::{self, ResultsControl, FAVORITE_TAG, SCENARIO_SUFFIX};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};

/// Splits a batch into first occurrences and, for every position, the slot
/// of its representative among them.
pub fn partition_duplicates(vectors: &[Vec<f64>]) -> (Vec<usize>, Vec<usize>) {
    let mut representatives: Vec<usize> = Vec::new();
    let mut assignment = Vec::with_capacity(vectors.len());

    for (i, v) in vectors.iter().enumerate() {
        match representatives
            .iter()
            .position(|&r| same_params(&vectors[r], v))
        {
            Some(slot) => assignment.push(slot),
            None => {
                assignment.push(representatives.len());
                representatives.push(i);
            }
        }
    }
    (representatives, assignment)
}

/// Broadcasts representative costs back over the full batch.
pub fn rebuild_costs(representative_costs: &[f64], assignment: &[usize]) -> Vec<f64> {
    assignment
        .iter()
        .map(|&slot| representative_costs[slot])
        .collect()
}

/// NaN marks an exception for reporting; the strategy ranks it at the base
/// penalty instead.
pub fn penalise_nan(costs: &[f64], base_penalty: f64) -> Vec<f64> {
    costs
        .iter()
        .map(|&c| if c.is_nan() { base_penalty } else { c })
        .collect()
}

/// Empties or creates the worker directory for a fresh run.
pub fn prepare_worker_dir(dir: &Path, clean: bool) -> AfResult<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
        return Ok(());
    }

    let entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    if entries.is_empty() {
        return Ok(());
    }
    if !clean {
        return Err(ArrayForgeError::Configuration(format!(
            "Worker directory {} is not empty; set clean_existing_dir to overwrite it",
            dir.display()
        )));
    }

    warn!(
        "Deleting {} entries in worker directory {}",
        entries.len(),
        dir.display()
    );
    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Removes artifacts a restarted run must not see: inputs, the favorite,
/// partial checkpoint writes and results beyond the last recorded index.
pub fn prune_artifacts(dir: &Path, root: &str, max_index: Option<u64>) -> AfResult<usize> {
    let favorite = worker::result_path(dir, root, FAVORITE_TAG);
    let mut removed = 0;

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };

        let stale_index = match (worker::artifact_index(&name, root), max_index) {
            (Some(i), Some(max)) => i > max,
            (Some(_), None) => true,
            _ => false,
        };
        let stale = stale_index
            || path == favorite
            || name.ends_with(".tmp")
            || (name.starts_with(root) && name.ends_with(SCENARIO_SUFFIX));

        if stale && path.is_file() {
            debug!("Pruning {}", path.display());
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Why the generation loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Strategy(StopReason),
    PauseFile,
    Stopped,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strategy(reason) => write!(f, "strategy stop ({})", reason),
            Self::PauseFile => write!(f, "pause file"),
            Self::Stopped => write!(f, "stop requested"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub generation: usize,
    pub min_cost: f64,
    pub dispatched: usize,
    pub cached: usize,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub termination: Termination,
    pub generations: usize,
    pub records: usize,
    pub best: Option<EvaluationRecord>,
    pub favorite: Evaluation,
}

/// Lowest finite cost among successful records.
pub fn best_record(records: &[EvaluationRecord]) -> Option<EvaluationRecord> {
    records
        .iter()
        .filter(|r| r.status == EvaluationStatus::Success && r.cost.is_finite())
        .min_by(|a, b| a.cost.total_cmp(&b.cost))
        .cloned()
}

/// Runs the ask / evaluate / tell loop over a worker pool.
pub struct Driver {
    options: RunOptions,
    params: ParamControl,
    strategy: CmaEs,
    noise: Option<NoiseHandler>,
    evaluator: Arc<Evaluator>,
    pool: WorkerPool,
}

impl Driver {
    /// Loads the root scenario and launches workers as child processes.
    pub fn new(options: RunOptions, restart: bool) -> AfResult<Self> {
        let scenario = Scenario::load(&options.root_project_path)?;
        let launcher = ProcessLauncher::new(options.worker_command.clone());
        Self::with_launcher(options, scenario, Box::new(launcher), restart)
    }

    pub fn with_launcher(
        options: RunOptions,
        scenario: Scenario,
        launcher: Box<dyn WorkerLauncher>,
        restart: bool,
    ) -> AfResult<Self> {
        let dir = options.worker_dir.clone();

        // 1. Parameter ranges always come from configuration
        let params = ParamControl::build(&options.parameters, &scenario)?;

        // 2. Workspace and persisted state
        let (cache, strategy, noise) = if restart {
            if !checkpoint::exists(&dir) {
                return Err(ArrayForgeError::Checkpoint(format!(
                    "No checkpoint found in {}",
                    dir.display()
                )));
            }
            let saved = checkpoint::load(&dir)?;
            if saved.strategy.dimension() != params.dimension() {
                return Err(ArrayForgeError::Checkpoint(format!(
                    "Checkpoint searches {} parameters but the configuration defines {}",
                    saved.strategy.dimension(),
                    params.dimension()
                )));
            }

            let mut strategy = saved.strategy;
            strategy.set_limits(options.max_simulations, options.max_generations, options.tolfun);

            let cache = EvaluationCache::from_records(saved.records)?;
            let removed = prune_artifacts(&dir, &options.root_name, cache.max_index())?;
            if options.pause_path.exists() {
                info!("Removing pause file {}", options.pause_path.display());
                fs::remove_file(&options.pause_path)?;
            }
            info!(
                "Restarting from generation {} with {} recorded evaluations ({} stale artifacts removed)",
                strategy.generation(),
                cache.len(),
                removed
            );
            (cache, strategy, saved.noise)
        } else {
            prepare_worker_dir(&dir, options.clean_existing_dir)?;

            let (lower, upper) = params.bounds();
            let strategy = CmaEs::new(
                &params.x0(),
                &lower,
                &upper,
                CmaOptions {
                    popsize: options.popsize,
                    max_fevals: options.max_simulations,
                    max_iterations: options.max_generations,
                    tolfun: options.tolfun,
                    seed: options.seed,
                    ..CmaOptions::default()
                },
            )?;
            let noise = match options.max_evals {
                Some(max) if max > 1 => Some(NoiseHandler::new(
                    params.dimension(),
                    options.min_evals,
                    max,
                    options.seed,
                )),
                _ => None,
            };
            (EvaluationCache::new(), strategy, noise)
        };

        ResultsControl {
            objective: options.objective.clone(),
            results_params: options.results_params.clone(),
            modules: options.scenario_modules.clone(),
        }
        .save(&dir)?;

        // 3. Evaluation plumbing
        let violations = Arc::new(ViolationLog::open(&dir.join(VIOLATION_LOG_FILE))?);
        let evaluator = Arc::new(Evaluator::new(
            EvaluatorSettings {
                root: options.root_name.clone(),
                worker_dir: dir,
                base_penalty: options.base_penalty,
                objective: options.objective.clone(),
                maximise: options.maximise,
            },
            Arc::new(scenario),
            Arc::new(cache),
            violations,
            launcher,
        )?);
        let pool = WorkerPool::new(options.n_threads, Arc::clone(&evaluator))?;

        info!(
            "Searching {} parameters with population {} on {} worker threads",
            params.dimension(),
            strategy.popsize(),
            pool.size()
        );

        Ok(Self {
            options,
            params,
            strategy,
            noise,
            evaluator,
            pool,
        })
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn strategy(&self) -> &CmaEs {
        &self.strategy
    }

    pub fn param_control(&self) -> &ParamControl {
        &self.params
    }

    pub fn cache(&self) -> &Arc<EvaluationCache> {
        self.evaluator.cache()
    }

    fn n_evals(&self) -> Option<usize> {
        self.noise.as_ref().map(NoiseHandler::n_evals)
    }

    /// Costs for a batch of resolved vectors, one worker job per distinct
    /// vector.
    fn evaluate_population(&self, physical: &[Vec<f64>]) -> AfResult<(Vec<f64>, usize)> {
        let (representatives, assignment) = partition_duplicates(physical);
        let batch: Vec<Vec<f64>> = representatives
            .iter()
            .map(|&i| physical[i].clone())
            .collect();
        if batch.len() < physical.len() {
            debug!(
                "{} duplicate candidates share {} evaluations",
                physical.len() - batch.len(),
                batch.len()
            );
        }

        let evaluations = self.pool.run_batch(&batch, self.n_evals())?;
        let dispatched = evaluations.iter().filter(|e| !e.is_cached()).count();
        let costs: Vec<f64> = evaluations.iter().map(|e| e.cost).collect();
        Ok((rebuild_costs(&costs, &assignment), dispatched))
    }

    fn handle_noise(&mut self, candidates: &[Vec<f64>], costs: &[f64]) -> AfResult<()> {
        let Some(mut noise) = self.noise.take() else {
            return Ok(());
        };
        let outcome = self.measure_noise(&mut noise, candidates, costs);
        self.noise = Some(noise);
        outcome
    }

    fn measure_noise(
        &mut self,
        noise: &mut NoiseHandler,
        candidates: &[Vec<f64>],
        costs: &[f64],
    ) -> AfResult<()> {
        let base = self.options.base_penalty;
        noise.prepare(candidates, costs);
        while let Some(solutions) = noise.ask(&mut self.strategy) {
            let physical: Vec<Vec<f64>> = solutions.iter().map(|x| self.params.resolve(x)).collect();
            let (values, _) = self.evaluate_population(&physical)?;
            noise.tell(&penalise_nan(&values, base));
        }
        if let Some(factor) = noise.sigma_fac() {
            self.strategy.scale_sigma(factor);
        }
        self.strategy.add_evaluations(noise.evaluations_just_done);
        debug!(
            "Noise measure {:.3e}, evaluations per candidate {}",
            noise.noise_s,
            noise.n_evals()
        );
        Ok(())
    }

    /// One full generation: ask, evaluate, tell, checkpoint.
    pub fn step(&mut self) -> AfResult<GenerationReport> {
        let base = self.options.base_penalty;

        // 1. Ask and resolve
        let candidates = self.strategy.ask();
        let physical: Vec<Vec<f64>> = candidates
            .iter()
            .map(|x| self.params.resolve(x))
            .collect();

        // 2. Evaluate behind the join barrier
        let (raw, dispatched) = self.evaluate_population(&physical)?;
        let costs = penalise_nan(&raw, base);

        // 3. Tell, then let the noise handler adjust sigma
        self.strategy.tell(&candidates, &costs)?;
        self.handle_noise(&candidates, &costs)?;

        let min_cost = costs.iter().copied().fold(f64::INFINITY, f64::min);
        let generation = self.strategy.generation();
        info!("Minimum fitness for iteration {}: {:.15e}", generation, min_cost);

        // 4. Checkpoint before the next generation is dispatched
        checkpoint::save(
            &self.options.worker_dir,
            &self.strategy,
            &self.cache().snapshot(),
            self.noise.as_ref(),
        )?;

        Ok(GenerationReport {
            generation,
            min_cost,
            dispatched,
            cached: physical.len() - dispatched,
        })
    }

    /// Re-runs the distribution mean outside the ledger.
    pub fn favorite(&self) -> AfResult<Evaluation> {
        let params = self.params.resolve(&self.strategy.mean());
        info!("Evaluating favorite solution");
        let favorite = self.evaluator.evaluate_favorite(&params, self.n_evals())?;
        if let Some(outcome) = &favorite.outcome {
            info!("Favorite finished with status {}", outcome.status());
        }
        Ok(favorite)
    }

    fn next_termination(&self, started: Instant, control: Option<&RunControl>) -> Option<Termination> {
        if let Some(reason) = self.strategy.stop() {
            return Some(Termination::Strategy(reason));
        }
        if let Some(limit) = self.options.timeout_secs.map(Duration::from_secs) {
            if started.elapsed() >= limit {
                return Some(Termination::Strategy(StopReason::Timeout));
            }
        }
        if self.options.pause_path.exists() {
            return Some(Termination::PauseFile);
        }
        match control {
            Some(c) if !c.wait_if_paused() => Some(Termination::Stopped),
            _ => None,
        }
    }

    /// Runs generations until a stop condition holds, then evaluates the
    /// favorite.
    pub fn run(&mut self, control: Option<&RunControl>) -> AfResult<RunSummary> {
        let span = info_span!("optimiser", worker_dir = %self.options.worker_dir.display());
        let _guard = span.enter();
        let started = Instant::now();

        let termination = loop {
            if let Some(t) = self.next_termination(started, control) {
                break t;
            }
            self.step()?;
        };
        info!("Optimisation ended: {}", termination);

        let favorite = self.favorite()?;
        let records = self.cache().snapshot();
        Ok(RunSummary {
            termination,
            generations: self.strategy.generation(),
            records: records.len(),
            best: best_record(&records),
            favorite,
        })
    }
}
