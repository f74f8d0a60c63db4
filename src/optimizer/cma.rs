use crate::error::{AfResult, ArrayForgeError};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use strum_macros::Display;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmaOptions {
    pub sigma0: f64,
    pub popsize: Option<usize>,
    pub max_fevals: Option<usize>,
    pub max_iterations: Option<usize>,
    pub tolfun: f64,
    pub tolx: f64,
    pub seed: Option<u64>,
}

impl Default for CmaOptions {
    fn default() -> Self {
        Self {
            sigma0: 1.0,
            popsize: None,
            max_fevals: None,
            max_iterations: None,
            tolfun: 1e-11,
            tolx: 1e-11,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    MaxFevals,
    MaxIter,
    TolFun,
    TolX,
    Timeout,
}

/// Strategy parameters derived from dimension and population size.
#[derive(Debug, Clone)]
struct Constants {
    n: usize,
    lambda: usize,
    mu: usize,
    weights: Vec<f64>,
    mu_eff: f64,
    c_sigma: f64,
    d_sigma: f64,
    c_c: f64,
    c_1: f64,
    c_mu: f64,
    chi_n: f64,
}

impl Constants {
    fn new(n: usize, lambda: usize) -> Self {
        let n_f = n as f64;
        let mu = (lambda / 2).max(1);

        let raw: Vec<f64> = (0..mu)
            .map(|i| ((lambda as f64 + 1.0) / 2.0).ln() - ((i + 1) as f64).ln())
            .collect();
        let total: f64 = raw.iter().sum();
        let weights: Vec<f64> = raw.iter().map(|w| w / total).collect();
        let mu_eff = 1.0 / weights.iter().map(|w| w * w).sum::<f64>();

        let c_sigma = (mu_eff + 2.0) / (n_f + mu_eff + 5.0);
        let d_sigma =
            1.0 + 2.0 * (((mu_eff - 1.0) / (n_f + 1.0)).sqrt() - 1.0).max(0.0) + c_sigma;
        let c_c = (4.0 + mu_eff / n_f) / (n_f + 4.0 + 2.0 * mu_eff / n_f);
        let c_1 = 2.0 / ((n_f + 1.3).powi(2) + mu_eff);
        let c_mu = (1.0 - c_1)
            .min(2.0 * (mu_eff - 2.0 + 1.0 / mu_eff) / ((n_f + 2.0).powi(2) + mu_eff));
        let chi_n = n_f.sqrt() * (1.0 - 1.0 / (4.0 * n_f) + 1.0 / (21.0 * n_f * n_f));

        Self {
            n,
            lambda,
            mu,
            weights,
            mu_eff,
            c_sigma,
            d_sigma,
            c_c,
            c_1,
            c_mu,
            chi_n,
        }
    }
}

pub fn default_popsize(n: usize) -> usize {
    4 + (3.0 * (n.max(1) as f64).ln()).floor() as usize
}

/// Versioned, plain representation of the strategy for checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmaState {
    pub n: usize,
    pub lambda: usize,
    pub options: CmaOptions,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub mean: Vec<f64>,
    pub sigma: f64,
    pub c: Vec<f64>,
    pub b: Vec<f64>,
    pub d: Vec<f64>,
    pub inv_sqrt_c: Vec<f64>,
    pub p_sigma: Vec<f64>,
    pub p_c: Vec<f64>,
    pub generation: usize,
    pub evaluations: usize,
    pub best: Option<(Vec<f64>, f64)>,
    pub history: Vec<f64>,
    pub last_costs: Vec<f64>,
    pub rng_seed: u64,
}

/// (mu/mu_w, lambda) CMA-ES with box bounds, driven through ask/tell.
#[derive(Debug, Clone)]
pub struct CmaEs {
    k: Constants,
    options: CmaOptions,
    lower: Vec<f64>,
    upper: Vec<f64>,
    mean: DVector<f64>,
    sigma: f64,
    c: DMatrix<f64>,
    b: DMatrix<f64>,
    d: DVector<f64>,
    inv_sqrt_c: DMatrix<f64>,
    p_sigma: DVector<f64>,
    p_c: DVector<f64>,
    generation: usize,
    evaluations: usize,
    best: Option<(Vec<f64>, f64)>,
    history: Vec<f64>,
    last_costs: Vec<f64>,
    rng: fastrand::Rng,
}

fn standard_normal(rng: &mut fastrand::Rng) -> f64 {
    let u1 = 1.0 - rng.f64();
    let u2 = rng.f64();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

impl CmaEs {
    pub fn new(x0: &[f64], lower: &[f64], upper: &[f64], options: CmaOptions) -> AfResult<Self> {
        let n = x0.len();
        if n == 0 || lower.len() != n || upper.len() != n {
            return Err(ArrayForgeError::Configuration(
                "Strategy requires matching, non-empty x0 and bounds".to_string(),
            ));
        }
        let lambda = options.popsize.unwrap_or_else(|| default_popsize(n)).max(2);
        let rng = match options.seed {
            Some(s) => fastrand::Rng::with_seed(s),
            None => fastrand::Rng::new(),
        };

        Ok(Self {
            k: Constants::new(n, lambda),
            sigma: options.sigma0,
            options,
            lower: lower.to_vec(),
            upper: upper.to_vec(),
            mean: DVector::from_column_slice(x0),
            c: DMatrix::identity(n, n),
            b: DMatrix::identity(n, n),
            d: DVector::from_element(n, 1.0),
            inv_sqrt_c: DMatrix::identity(n, n),
            p_sigma: DVector::zeros(n),
            p_c: DVector::zeros(n),
            generation: 0,
            evaluations: 0,
            best: None,
            history: Vec::new(),
            last_costs: Vec::new(),
            rng,
        })
    }

    pub fn popsize(&self) -> usize {
        self.k.lambda
    }

    pub fn dimension(&self) -> usize {
        self.k.n
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Distribution mean; the favorite estimate.
    pub fn mean(&self) -> Vec<f64> {
        self.mean.iter().copied().collect()
    }

    pub fn best(&self) -> Option<(&[f64], f64)> {
        self.best.as_ref().map(|(x, f)| (x.as_slice(), *f))
    }

    /// Replaces the stopping budget, e.g. when a restarted run extends it.
    pub fn set_limits(&mut self, max_fevals: Option<usize>, max_iterations: Option<usize>, tolfun: f64) {
        self.options.max_fevals = max_fevals;
        self.options.max_iterations = max_iterations;
        self.options.tolfun = tolfun;
    }

    pub fn add_evaluations(&mut self, n: usize) {
        self.evaluations += n;
    }

    pub fn scale_sigma(&mut self, factor: f64) {
        self.sigma = (self.sigma * factor).clamp(1e-20, 1e10);
    }

    fn in_bounds(&self, x: &DVector<f64>) -> bool {
        x.iter()
            .zip(self.lower.iter().zip(&self.upper))
            .all(|(v, (lo, hi))| *v >= *lo && *v <= *hi)
    }

    fn sample(&mut self, centre: &DVector<f64>, sigma: f64) -> Vec<f64> {
        let n = self.k.n;
        for _ in 0..100 {
            let z = DVector::from_fn(n, |_, _| standard_normal(&mut self.rng));
            let x = centre + sigma * (&self.b * self.d.component_mul(&z));
            if self.in_bounds(&x) {
                return x.iter().copied().collect();
            }
        }

        // Fall back to clipping
        let z = DVector::from_fn(n, |_, _| standard_normal(&mut self.rng));
        let x = centre + sigma * (&self.b * self.d.component_mul(&z));
        x.iter()
            .zip(self.lower.iter().zip(&self.upper))
            .map(|(v, (lo, hi))| v.clamp(*lo, *hi))
            .collect()
    }

    /// Samples one generation of candidates.
    pub fn ask(&mut self) -> Vec<Vec<f64>> {
        let centre = self.mean.clone();
        let sigma = self.sigma;
        (0..self.k.lambda).map(|_| self.sample(&centre, sigma)).collect()
    }

    /// Samples one candidate around `centre` with step size scaled by
    /// `sigma_factor`.
    pub fn ask_around(&mut self, centre: &[f64], sigma_factor: f64) -> Vec<f64> {
        let centre = DVector::from_column_slice(centre);
        let sigma = self.sigma * sigma_factor;
        self.sample(&centre, sigma)
    }

    pub fn tell(&mut self, solutions: &[Vec<f64>], costs: &[f64]) -> AfResult<()> {
        let n = self.k.n;
        let mu = self.k.mu;
        if solutions.len() != costs.len() || solutions.len() < mu {
            return Err(ArrayForgeError::Configuration(format!(
                "tell() needs at least {} matching solutions and costs, got {} and {}",
                mu,
                solutions.len(),
                costs.len()
            )));
        }
        if costs.iter().any(|c| c.is_nan()) {
            return Err(ArrayForgeError::Configuration(
                "tell() received a NaN cost".to_string(),
            ));
        }
        if solutions.iter().any(|s| s.len() != n) {
            return Err(ArrayForgeError::Configuration(
                "tell() received a solution of the wrong dimension".to_string(),
            ));
        }

        let mut order: Vec<usize> = (0..costs.len()).collect();
        order.sort_by(|&a, &b| costs[a].total_cmp(&costs[b]));

        let best_idx = order[0];
        if self.best.as_ref().map_or(true, |(_, f)| costs[best_idx] < *f) {
            self.best = Some((solutions[best_idx].clone(), costs[best_idx]));
        }
        self.history.push(costs[best_idx]);
        self.last_costs = costs.to_vec();
        self.evaluations += costs.len();

        let ranked: Vec<DVector<f64>> = order
            .iter()
            .take(mu)
            .map(|&i| DVector::from_column_slice(&solutions[i]))
            .collect();
        self.update(&ranked);
        Ok(())
    }

    fn update(&mut self, ranked: &[DVector<f64>]) {
        let n = self.k.n;
        let k = &self.k;
        let sigma = self.sigma;

        // 1. Mean
        let mut new_mean = DVector::zeros(n);
        for (w, x) in k.weights.iter().zip(ranked) {
            new_mean += *w * x;
        }
        let mean_diff = &new_mean - &self.mean;

        // 2. Evolution paths
        self.p_sigma = (1.0 - k.c_sigma) * &self.p_sigma
            + (k.c_sigma * (2.0 - k.c_sigma) * k.mu_eff).sqrt() * (&self.inv_sqrt_c * &mean_diff)
                / sigma;

        let p_sigma_norm = self.p_sigma.norm();
        let threshold = (1.0 - (1.0 - k.c_sigma).powi(2 * (self.generation as i32 + 1))).sqrt()
            * (1.4 + 2.0 / (n as f64 + 1.0))
            * k.chi_n;
        let h_sigma = if p_sigma_norm < threshold { 1.0 } else { 0.0 };

        self.p_c = (1.0 - k.c_c) * &self.p_c
            + h_sigma * (k.c_c * (2.0 - k.c_c) * k.mu_eff).sqrt() * &mean_diff / sigma;

        // 3. Covariance
        let delta_h = (1.0 - h_sigma) * k.c_c * (2.0 - k.c_c);
        let old_weight = 1.0 - k.c_1 - k.c_mu + k.c_1 * delta_h;
        let rank_one = k.c_1 * &self.p_c * self.p_c.transpose();
        let mut rank_mu = DMatrix::zeros(n, n);
        for (w, x) in k.weights.iter().zip(ranked) {
            let y = (x - &self.mean) / sigma;
            rank_mu += *w * &y * y.transpose();
        }
        self.c = old_weight * &self.c + rank_one + k.c_mu * rank_mu;

        // 4. Step size
        self.sigma *= ((k.c_sigma / k.d_sigma) * (p_sigma_norm / k.chi_n - 1.0)).exp();
        self.sigma = self.sigma.clamp(1e-20, 1e10);

        self.mean = new_mean;
        self.generation += 1;
        self.update_eigen();
    }

    fn update_eigen(&mut self) {
        let n = self.k.n;
        self.c = (&self.c + self.c.transpose()) / 2.0;
        let eigen = self.c.clone().symmetric_eigen();
        self.d = DVector::from_fn(n, |i, _| eigen.eigenvalues[i].max(1e-20).sqrt());
        self.b = eigen.eigenvectors;
        let d_inv = DVector::from_fn(n, |i, _| 1.0 / self.d[i]);
        self.inv_sqrt_c = &self.b * DMatrix::from_diagonal(&d_inv) * self.b.transpose();
    }

    fn history_window(&self) -> usize {
        10 + (30.0 * self.k.n as f64 / self.k.lambda as f64).ceil() as usize
    }

    /// Reason to stop, if any criterion is met.
    pub fn stop(&self) -> Option<StopReason> {
        if let Some(max) = self.options.max_fevals {
            if self.evaluations >= max {
                return Some(StopReason::MaxFevals);
            }
        }
        if let Some(max) = self.options.max_iterations {
            if self.generation >= max {
                return Some(StopReason::MaxIter);
            }
        }

        let window = self.history_window();
        if self.generation > 0 && self.history.len() >= window {
            let recent = self.history[self.history.len() - window..]
                .iter()
                .chain(&self.last_costs);
            let (lo, hi) = recent.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(*v), hi.max(*v))
            });
            if hi - lo < self.options.tolfun {
                return Some(StopReason::TolFun);
            }
        }

        if self.generation > 0 {
            let max_std = self.c.diagonal().iter().fold(0.0f64, |m, v| m.max(v.sqrt()));
            let pc_max = self.p_c.iter().fold(0.0f64, |m, v| m.max(v.abs()));
            if self.sigma * max_std.max(pc_max) < self.options.tolx * self.options.sigma0 {
                return Some(StopReason::TolX);
            }
        }

        None
    }

    pub fn to_state(&self) -> CmaState {
        let flat = |m: &DMatrix<f64>| m.as_slice().to_vec();
        CmaState {
            n: self.k.n,
            lambda: self.k.lambda,
            options: self.options.clone(),
            lower: self.lower.clone(),
            upper: self.upper.clone(),
            mean: self.mean(),
            sigma: self.sigma,
            c: flat(&self.c),
            b: flat(&self.b),
            d: self.d.iter().copied().collect(),
            inv_sqrt_c: flat(&self.inv_sqrt_c),
            p_sigma: self.p_sigma.iter().copied().collect(),
            p_c: self.p_c.iter().copied().collect(),
            generation: self.generation,
            evaluations: self.evaluations,
            best: self.best.clone(),
            history: self.history.clone(),
            last_costs: self.last_costs.clone(),
            rng_seed: self.rng.get_seed(),
        }
    }

    pub fn from_state(state: CmaState) -> AfResult<Self> {
        let n = state.n;
        let square = |v: &Vec<f64>, name: &str| {
            if v.len() != n * n {
                return Err(ArrayForgeError::Checkpoint(format!(
                    "Strategy field '{}' has {} entries, expected {}",
                    name,
                    v.len(),
                    n * n
                )));
            }
            Ok(DMatrix::from_column_slice(n, n, v))
        };
        let vector = |v: &Vec<f64>, name: &str| {
            if v.len() != n {
                return Err(ArrayForgeError::Checkpoint(format!(
                    "Strategy field '{}' has {} entries, expected {}",
                    name,
                    v.len(),
                    n
                )));
            }
            Ok(DVector::from_column_slice(v))
        };

        Ok(Self {
            k: Constants::new(n, state.lambda),
            c: square(&state.c, "c")?,
            b: square(&state.b, "b")?,
            inv_sqrt_c: square(&state.inv_sqrt_c, "inv_sqrt_c")?,
            mean: vector(&state.mean, "mean")?,
            d: vector(&state.d, "d")?,
            p_sigma: vector(&state.p_sigma, "p_sigma")?,
            p_c: vector(&state.p_c, "p_c")?,
            lower: state.lower,
            upper: state.upper,
            sigma: state.sigma,
            options: state.options,
            generation: state.generation,
            evaluations: state.evaluations,
            best: state.best,
            history: state.history,
            last_costs: state.last_costs,
            rng: fastrand::Rng::with_seed(state.rng_seed),
        })
    }
}
