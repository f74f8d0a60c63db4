use super::cma::CmaEs;
use serde::{Deserialize, Serialize};

/// Percentile with linear interpolation between order statistics.
pub fn prctile(data: &[f64], p: f64) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let fi = p * n as f64 / 100.0 - 0.5;
    if fi <= 0.0 {
        sorted[0]
    } else if fi >= (n - 1) as f64 {
        sorted[n - 1]
    } else {
        let i = fi as usize;
        (i as f64 + 1.0 - fi) * sorted[i] + (fi - i as f64) * sorted[i + 1]
    }
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn argsort(values: &[f64]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    idx
}

/// Uncertainty handling after Hansen et al. (2009): re-evaluates a few
/// solutions per generation, measures rank changes and raises sigma and the
/// evaluation count while noise dominates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseHandler {
    pub reevals: Option<f64>,
    pub epsilon: f64,
    pub theta: f64,
    pub cum: f64,
    pub alpha_sigma: f64,
    pub alpha_evals: f64,
    pub alpha_evals_down: f64,
    pub evaluations: f64,
    pub min_evals: usize,
    pub max_evals: usize,
    pub noise_s: f64,
    pub evaluations_just_done: usize,
    popsize: usize,
    idx: Vec<usize>,
    idx_counter: usize,
    fit: Vec<f64>,
    fitre: Vec<f64>,
    solutions: Vec<Vec<f64>>,
    sigma_fac: Option<f64>,
    stopped: bool,
    rng_seed: u64,
}

impl NoiseHandler {
    pub fn new(dimension: usize, min_evals: usize, max_evals: usize, seed: Option<u64>) -> Self {
        let n = dimension as f64;
        let alpha = 1.0 + 2.0 / (n + 10.0);
        let min_evals = min_evals.max(1).min(max_evals.max(1));
        let rng = match seed {
            Some(s) => fastrand::Rng::with_seed(s),
            None => fastrand::Rng::new(),
        };

        Self {
            reevals: None,
            epsilon: 1e-7,
            theta: 0.5,
            cum: 0.3,
            alpha_sigma: alpha,
            alpha_evals: alpha,
            alpha_evals_down: alpha.powf(-0.25),
            evaluations: min_evals as f64,
            min_evals,
            max_evals: max_evals.max(1),
            noise_s: 0.0,
            evaluations_just_done: 0,
            popsize: 1,
            idx: Vec::new(),
            idx_counter: 0,
            fit: Vec::new(),
            fitre: Vec::new(),
            solutions: Vec::new(),
            sigma_fac: None,
            stopped: true,
            rng_seed: rng.get_seed(),
        }
    }

    /// Evaluations aggregated into one fitness value.
    pub fn n_evals(&self) -> usize {
        (self.evaluations as usize).max(1)
    }

    pub fn is_done(&self) -> bool {
        self.stopped
    }

    /// Factor for sigma once the measurement for this generation is done.
    pub fn sigma_fac(&self) -> Option<f64> {
        if self.stopped {
            self.sigma_fac
        } else {
            None
        }
    }

    fn indices(&mut self, fit: &[f64]) -> Vec<usize> {
        let lam_reev = self.reevals.unwrap_or(2.0 + fit.len() as f64 / 20.0);
        let mut rng = fastrand::Rng::with_seed(self.rng_seed);
        let extra = usize::from(lam_reev.fract() > rng.f64());
        self.rng_seed = rng.get_seed();

        let lam_reev = (lam_reev as usize + extra).min(fit.len());
        let n_first = lam_reev - lam_reev / 2;

        let tail: Vec<f64> = fit.iter().skip(n_first).copied().collect();
        let mut idx: Vec<usize> = (0..n_first.min(fit.len())).collect();
        idx.extend(
            argsort(&tail)
                .into_iter()
                .take(lam_reev - n_first)
                .map(|i| i + n_first),
        );
        idx
    }

    pub fn prepare(&mut self, solutions: &[Vec<f64>], fit: &[f64]) {
        self.stopped = false;
        self.sigma_fac = None;
        self.evaluations_just_done = 0;

        if self.max_evals == 0 || self.reevals == Some(0.0) {
            self.sigma_fac = Some(1.0);
            self.stopped = true;
            return;
        }

        self.idx = self.indices(fit);
        if self.idx.is_empty() {
            self.sigma_fac = Some(1.0);
            self.stopped = true;
            return;
        }

        self.idx_counter = 0;
        self.fit = fit.to_vec();
        self.fitre = fit.to_vec();
        self.solutions = solutions.to_vec();
        self.popsize = self.n_evals();
    }

    /// Perturbed copies of the next solution to re-evaluate.
    pub fn ask(&self, es: &mut CmaEs) -> Option<Vec<Vec<f64>>> {
        if self.stopped {
            return None;
        }
        let x = self.solutions.get(*self.idx.get(self.idx_counter)?)?;
        Some(
            (0..self.popsize)
                .map(|_| es.ask_around(x, self.epsilon))
                .collect(),
        )
    }

    pub fn tell(&mut self, values: &[f64]) {
        if self.stopped {
            return;
        }
        let Some(&i) = self.idx.get(self.idx_counter) else {
            return;
        };
        self.fitre[i] = median(values);
        self.idx_counter += 1;
        if self.idx_counter < self.idx.len() {
            return;
        }

        self.evaluations_just_done = self.popsize * self.idx.len();
        self.update_measure();
        self.sigma_fac = Some(self.treat());
        self.stopped = true;
    }

    fn update_measure(&mut self) -> f64 {
        let lam = self.fit.len();
        let combined: Vec<f64> = self.fit.iter().chain(&self.fitre).copied().collect();
        let order = argsort(&combined);
        let mut ranks = vec![0usize; 2 * lam];
        for (rank, &i) in order.iter().enumerate() {
            ranks[i] = rank;
        }
        let (r0, r1) = ranks.split_at(lam);

        let r: Vec<f64> = (1..2 * lam).map(|v| v as f64).collect();
        let spread = |own: usize, other: usize| {
            let centre = own as f64 + 1.0 - if own > other { 1.0 } else { 0.0 };
            let dist: Vec<f64> = r.iter().map(|v| (v - centre).abs()).collect();
            prctile(&dist, self.theta * 50.0)
        };

        let s: Vec<f64> = self
            .idx
            .iter()
            .map(|&i| {
                let delta = r0[i] as f64 - r1[i] as f64;
                let rank_delta = delta - delta.signum() * f64::from(delta != 0.0);
                let limit = 0.5 * (spread(r0[i], r1[i]) + spread(r1[i], r0[i]));
                rank_delta.abs() - limit.max(1.0)
            })
            .collect();

        let mean = s.iter().sum::<f64>() / s.len() as f64;
        self.noise_s += self.cum * (mean - self.noise_s);
        self.noise_s
    }

    fn treat(&mut self) -> f64 {
        if self.noise_s > 0.0 {
            self.evaluations = (self.evaluations * self.alpha_evals).min(self.max_evals as f64);
            self.alpha_sigma
        } else {
            self.evaluations =
                (self.evaluations * self.alpha_evals_down).max(self.min_evals as f64);
            1.0
        }
    }
}
