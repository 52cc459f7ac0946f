//! Covariance Matrix Adaptation Evolution Strategy.
//!
//! State is the distribution mean, global step-size and covariance matrix,
//! updated once per consumed generation of `λ` completed trials: weighted
//! mean recombination, cumulative step-size adaptation, and rank-one plus
//! rank-μ covariance updates. The sampler works in the normalized unit cube
//! of the continuous parameters; integer and categorical parameters fall
//! back to independent random draws within the same trial.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use scout_types::{Distribution, Goal, SamplerError, SearchSpace, Trial, TrialStatus};

use crate::{gauss, Params, Sampler};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CmaEsOptions {
    /// Candidates per generation; default `4 + floor(3 ln d)`.
    pub population_size: Option<usize>,
    /// Initial step-size in the normalized space.
    pub sigma0: f64,
}

impl Default for CmaEsOptions {
    fn default() -> Self {
        Self {
            population_size: None,
            sigma0: 0.3,
        }
    }
}

/// Strategy state for one fixed set of continuous dimensions.
#[derive(Debug)]
struct CmaState {
    dim: usize,
    lambda: usize,
    weights: Vec<f64>,
    mueff: f64,
    cc: f64,
    cs: f64,
    c1: f64,
    cmu: f64,
    damps: f64,
    chi_n: f64,

    mean: Vec<f64>,
    sigma: f64,
    cov: Vec<Vec<f64>>,
    pc: Vec<f64>,
    ps: Vec<f64>,
    /// Eigendecomposition of `cov`, refreshed after every update.
    eig_vectors: Vec<Vec<f64>>,
    eig_values: Vec<f64>,
    generations: u32,

    /// Completed evaluations waiting to form a full generation.
    pending: Vec<(Vec<f64>, f64)>,
    consumed: HashSet<u32>,
}

impl CmaState {
    fn new(dim: usize, lambda: usize, sigma0: f64) -> Self {
        let mu = lambda / 2;
        let raw: Vec<f64> = (0..mu)
            .map(|i| ((mu as f64) + 0.5).ln() - ((i + 1) as f64).ln())
            .collect();
        let total: f64 = raw.iter().sum();
        let weights: Vec<f64> = raw.iter().map(|w| w / total).collect();
        let mueff = 1.0 / weights.iter().map(|w| w * w).sum::<f64>();

        let d = dim as f64;
        let cc = (4.0 + mueff / d) / (d + 4.0 + 2.0 * mueff / d);
        let cs = (mueff + 2.0) / (d + mueff + 5.0);
        let c1 = 2.0 / ((d + 1.3) * (d + 1.3) + mueff);
        let cmu = (2.0 * (mueff - 2.0 + 1.0 / mueff) / ((d + 2.0) * (d + 2.0) + mueff))
            .min(1.0 - c1);
        let damps = 1.0 + 2.0 * (((mueff - 1.0) / (d + 1.0)).sqrt() - 1.0).max(0.0) + cs;
        let chi_n = d.sqrt() * (1.0 - 1.0 / (4.0 * d) + 1.0 / (21.0 * d * d));

        let identity: Vec<Vec<f64>> = (0..dim)
            .map(|i| (0..dim).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
            .collect();

        Self {
            dim,
            lambda,
            weights,
            mueff,
            cc,
            cs,
            c1,
            cmu,
            damps,
            chi_n,
            mean: vec![0.5; dim],
            sigma: sigma0,
            cov: identity.clone(),
            pc: vec![0.0; dim],
            ps: vec![0.0; dim],
            eig_vectors: identity,
            eig_values: vec![1.0; dim],
            generations: 0,
            pending: Vec::new(),
            consumed: HashSet::new(),
        }
    }

    /// Draw one candidate `m + σ · B D z`.
    fn ask(&self, rng: &mut dyn RngCore) -> Vec<f64> {
        let z: Vec<f64> = (0..self.dim).map(|_| gauss(rng)).collect();
        let mut x = self.mean.clone();
        for i in 0..self.dim {
            let mut yi = 0.0;
            for j in 0..self.dim {
                yi += self.eig_vectors[i][j] * self.eig_values[j].max(0.0).sqrt() * z[j];
            }
            x[i] = (x[i] + self.sigma * yi).clamp(0.0, 1.0 - f64::EPSILON);
        }
        x
    }

    /// Feed one completed evaluation; runs a full update once `λ` have
    /// accumulated.
    fn tell(&mut self, x: Vec<f64>, score: f64) {
        self.pending.push((x, score));
        if self.pending.len() >= self.lambda {
            self.update();
            self.pending.clear();
        }
    }

    fn update(&mut self) {
        let mut ranked = std::mem::take(&mut self.pending);
        ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let mu = self.weights.len();
        let old_mean = self.mean.clone();

        // y_i = (x_i - m) / σ for the μ best candidates.
        let ys: Vec<Vec<f64>> = ranked[..mu]
            .iter()
            .map(|(x, _)| {
                (0..self.dim)
                    .map(|d| (x[d] - old_mean[d]) / self.sigma)
                    .collect()
            })
            .collect();

        let mut y_w = vec![0.0; self.dim];
        for (w, y) in self.weights.iter().zip(&ys) {
            for d in 0..self.dim {
                y_w[d] += w * y[d];
            }
        }
        for d in 0..self.dim {
            self.mean[d] = (old_mean[d] + self.sigma * y_w[d]).clamp(0.0, 1.0 - f64::EPSILON);
        }

        // C^{-1/2} y_w = B D^{-1} B^T y_w
        let mut bty = vec![0.0; self.dim];
        for j in 0..self.dim {
            for i in 0..self.dim {
                bty[j] += self.eig_vectors[i][j] * y_w[i];
            }
        }
        let mut c_inv_sqrt_yw = vec![0.0; self.dim];
        for i in 0..self.dim {
            for j in 0..self.dim {
                let dj = self.eig_values[j].max(1e-20).sqrt();
                c_inv_sqrt_yw[i] += self.eig_vectors[i][j] * bty[j] / dj;
            }
        }

        let cs_coeff = (self.cs * (2.0 - self.cs) * self.mueff).sqrt();
        for d in 0..self.dim {
            self.ps[d] = (1.0 - self.cs) * self.ps[d] + cs_coeff * c_inv_sqrt_yw[d];
        }

        self.generations += 1;
        let ps_norm = self.ps.iter().map(|v| v * v).sum::<f64>().sqrt();
        let denom = (1.0 - (1.0 - self.cs).powi(2 * self.generations as i32)).sqrt();
        let hsig = ps_norm / denom / self.chi_n < 1.4 + 2.0 / (self.dim as f64 + 1.0);

        let cc_coeff = (self.cc * (2.0 - self.cc) * self.mueff).sqrt();
        for d in 0..self.dim {
            self.pc[d] =
                (1.0 - self.cc) * self.pc[d] + if hsig { cc_coeff * y_w[d] } else { 0.0 };
        }

        // Covariance: decay + rank-one (pc) + rank-μ (y outer products).
        let w_sum: f64 = self.weights.iter().sum();
        let decay = 1.0 - self.c1 - self.cmu * w_sum;
        let hsig_fix = if hsig {
            0.0
        } else {
            self.c1 * self.cc * (2.0 - self.cc)
        };
        for i in 0..self.dim {
            for j in 0..self.dim {
                let mut c = (decay + hsig_fix) * self.cov[i][j];
                c += self.c1 * self.pc[i] * self.pc[j];
                for (w, y) in self.weights.iter().zip(&ys) {
                    c += self.cmu * w * y[i] * y[j];
                }
                self.cov[i][j] = c;
            }
        }

        self.sigma *= ((self.cs / self.damps) * (ps_norm / self.chi_n - 1.0)).exp();
        self.sigma = self.sigma.clamp(1e-12, 1e3);

        let (vectors, values) = jacobi_eigen(&self.cov);
        self.eig_vectors = vectors;
        self.eig_values = values;
    }
}

/// Eigendecomposition of a symmetric matrix by cyclic Jacobi rotations.
/// Returns `(B, D)` with columns of `B` the eigenvectors.
fn jacobi_eigen(matrix: &[Vec<f64>]) -> (Vec<Vec<f64>>, Vec<f64>) {
    let n = matrix.len();
    let mut a: Vec<Vec<f64>> = matrix.to_vec();
    let mut v: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    for _sweep in 0..50 {
        let mut off = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                off += a[i][j] * a[i][j];
            }
        }
        if off < 1e-24 {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                if a[p][q].abs() < 1e-18 {
                    continue;
                }
                let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for k in 0..n {
                    let akp = a[k][p];
                    let akq = a[k][q];
                    a[k][p] = c * akp - s * akq;
                    a[k][q] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[p][k];
                    let aqk = a[q][k];
                    a[p][k] = c * apk - s * aqk;
                    a[q][k] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[k][p];
                    let vkq = v[k][q];
                    v[k][p] = c * vkp - s * vkq;
                    v[k][q] = s * vkp + c * vkq;
                }
            }
        }
    }

    let values: Vec<f64> = (0..n).map(|i| a[i][i]).collect();
    (v, values)
}

#[derive(Debug)]
pub struct CmaEsSampler {
    opts: CmaEsOptions,
    goal: Goal,
    state: Option<CmaState>,
    /// Names of the continuous dimensions the state was built for.
    dims: Vec<String>,
}

impl CmaEsSampler {
    pub fn new(opts: CmaEsOptions, goal: Goal) -> Self {
        Self {
            opts,
            goal,
            state: None,
            dims: Vec::new(),
        }
    }

    fn continuous_dims(space: &SearchSpace) -> Vec<String> {
        space
            .params
            .iter()
            .filter(|def| {
                matches!(
                    def.distribution,
                    Distribution::Uniform { .. } | Distribution::LogUniform { .. }
                )
            })
            .map(|def| def.name.clone())
            .collect()
    }

    /// Normalized coordinates of one finished trial, if it covers every
    /// continuous dimension.
    fn coordinates(&self, space: &SearchSpace, trial: &Trial) -> Option<Vec<f64>> {
        self.dims
            .iter()
            .map(|name| {
                let dist = space.get(name)?;
                dist.encode(name, trial.params.get(name)?).ok()
            })
            .collect()
    }
}

impl Sampler for CmaEsSampler {
    fn next(
        &mut self,
        space: &SearchSpace,
        _trial_index: u32,
        history: &[Trial],
        rng: &mut dyn RngCore,
    ) -> Result<Option<Params>, SamplerError> {
        let dims = Self::continuous_dims(space);
        if dims.is_empty() {
            return Err(SamplerError::ImpossibleDistribution {
                name: "cmaes".to_string(),
                message: "requires at least one continuous parameter".to_string(),
            });
        }
        if self.state.is_none() || self.dims != dims {
            let d = dims.len();
            let lambda = self
                .opts
                .population_size
                .unwrap_or(4 + (3.0 * (d as f64).ln()).floor() as usize)
                .max(4);
            self.state = Some(CmaState::new(d, lambda, self.opts.sigma0));
            self.dims = dims;
        }

        // Feed newly finished evaluations into the strategy.
        let goal = self.goal;
        let mut fresh: Vec<(u32, Vec<f64>, f64)> = Vec::new();
        {
            let state = self.state.as_ref().unwrap();
            for trial in history {
                if trial.status != TrialStatus::Completed {
                    continue;
                }
                if state.consumed.contains(&trial.number) {
                    continue;
                }
                let (Some(score), Some(coords)) = (trial.score, self.coordinates(space, trial))
                else {
                    continue;
                };
                // Internally CMA-ES always minimizes.
                let score = match goal {
                    Goal::Minimize => score,
                    Goal::Maximize => -score,
                };
                fresh.push((trial.number, coords, score));
            }
        }
        fresh.sort_by_key(|(n, _, _)| *n);
        let state = self.state.as_mut().unwrap();
        for (number, coords, score) in fresh {
            state.consumed.insert(number);
            state.tell(coords, score);
        }

        let point = state.ask(rng);
        let mut params = Params::new();
        for (name, u) in self.dims.iter().zip(point) {
            let dist = space.get(name).expect("dimension vanished from space");
            params.insert(name.clone(), dist.decode(u));
        }
        // Non-continuous parameters fall back to random within this trial.
        for def in &space.params {
            if !params.contains_key(&def.name) {
                let u: f64 = rng.gen();
                params.insert(def.name.clone(), def.distribution.decode(u));
            }
        }
        Ok(Some(params))
    }

    fn name(&self) -> &str {
        "cmaes"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use scout_types::{derive_seed, ParamValue};
    use std::collections::BTreeMap;

    #[test]
    fn jacobi_recovers_known_eigenvalues() {
        let m = vec![vec![2.0, 1.0], vec![1.0, 2.0]];
        let (_, mut values) = jacobi_eigen(&m);
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert!((values[0] - 1.0).abs() < 1e-9);
        assert!((values[1] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_spaces_without_continuous_params() {
        let space = SearchSpace::new().add_int("n", 1, 5);
        let mut cma = CmaEsSampler::new(CmaEsOptions::default(), Goal::Minimize);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(cma.next(&space, 0, &[], &mut rng).is_err());
    }

    #[test]
    fn mixed_space_falls_back_to_random_for_discrete() {
        let space = SearchSpace::new()
            .add_uniform("x", 0.0, 1.0)
            .add_int("n", 1, 5);
        let mut cma = CmaEsSampler::new(CmaEsOptions::default(), Goal::Minimize);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let params = cma.next(&space, 0, &[], &mut rng).unwrap().unwrap();
        assert!(matches!(params.get("x"), Some(ParamValue::Float(_))));
        assert!(matches!(params.get("n"), Some(ParamValue::Int(v)) if (1..=5).contains(v)));
    }

    /// Drive CMA-ES on the sphere function through the sampler interface
    /// and check the mean migrates toward the optimum.
    #[test]
    fn sphere_mean_converges() {
        let space = SearchSpace::new()
            .add_uniform("x", -5.0, 5.0)
            .add_uniform("y", -5.0, 5.0);
        let mut cma = CmaEsSampler::new(CmaEsOptions::default(), Goal::Minimize);
        let mut history: Vec<Trial> = Vec::new();

        for number in 0..120u32 {
            let mut rng = ChaCha8Rng::seed_from_u64(number as u64);
            let params = cma
                .next(&space, number, &history, &mut rng)
                .unwrap()
                .unwrap();
            let x = params.get("x").unwrap().as_f64().unwrap();
            let y = params.get("y").unwrap().as_f64().unwrap();
            let score = x * x + y * y;

            let mut t = Trial::new(
                "cma",
                number,
                BTreeMap::from([
                    ("x".to_string(), ParamValue::Float(x)),
                    ("y".to_string(), ParamValue::Float(y)),
                ]),
                derive_seed("cma", number, 0),
            );
            t.mark_running();
            t.mark_completed(score);
            history.push(t);
        }

        let state = cma.state.as_ref().unwrap();
        // Optimum (0,0) is at 0.5 in normalized coordinates.
        for d in 0..2 {
            assert!(
                (state.mean[d] - 0.5).abs() < 0.15,
                "mean[{d}] = {} did not approach 0.5",
                state.mean[d]
            );
        }
        assert!(state.generations > 5);
    }

    #[test]
    fn maximization_flips_ranking() {
        let space = SearchSpace::new().add_uniform("x", 0.0, 1.0);
        let mut cma = CmaEsSampler::new(CmaEsOptions::default(), Goal::Maximize);
        let mut history: Vec<Trial> = Vec::new();
        for number in 0..60u32 {
            let mut rng = ChaCha8Rng::seed_from_u64(1000 + number as u64);
            let params = cma
                .next(&space, number, &history, &mut rng)
                .unwrap()
                .unwrap();
            let x = params.get("x").unwrap().as_f64().unwrap();
            let mut t = Trial::new(
                "cma-max",
                number,
                BTreeMap::from([("x".to_string(), ParamValue::Float(x))]),
                derive_seed("cma-max", number, 0),
            );
            t.mark_running();
            // Peak at x = 0.8.
            t.mark_completed(-(x - 0.8) * (x - 0.8));
            history.push(t);
        }
        let state = cma.state.as_ref().unwrap();
        assert!(
            (state.mean[0] - 0.8).abs() < 0.2,
            "mean = {} did not approach 0.8",
            state.mean[0]
        );
    }
}
