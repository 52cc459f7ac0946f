//! Tree-structured Parzen Estimator.
//!
//! After a random startup phase the finished trials are split by score into
//! a small "good" set and the remainder; a density `l` is fitted over the
//! good values and `g` over the rest, and candidates drawn from `l` are
//! ranked by the expected-improvement surrogate `log l(x) − log g(x)`.
//! Categorical parameters use smoothed histograms, integer parameters a
//! discrete KDE on the integer scale, and the `multivariate` option fits a
//! joint product-kernel KDE over the numeric parameters.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use scout_math::{mean_std, LogDensity};
use scout_types::{
    Distribution, Goal, ParamValue, SamplerError, SearchSpace, Trial, TrialStatus,
};

use crate::random::RandomSampler;
use crate::{gauss, Params, Sampler};

const LN_2PI: f64 = 1.8378770664093453;

/// An externally supplied trial used to seed the good set before any local
/// history exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmStartTrial {
    pub params: BTreeMap<String, ParamValue>,
    /// Score under the same goal; entries without one are treated as good.
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TpeOptions {
    /// Trials delegated to random sampling before the estimator kicks in.
    pub n_startup_trials: usize,
    /// Fraction of finished trials forming the good set.
    pub gamma: f64,
    /// Candidates drawn from `l` per parameter.
    pub n_candidates: usize,
    /// Fit a joint KDE over the numeric parameters instead of independent
    /// one-dimensional estimators.
    pub multivariate: bool,
    /// Weight of the uniform prior mixed into both densities; also the
    /// smoothing constant for categorical histograms.
    pub prior_weight: f64,
    /// External trials seeding the estimator.
    pub warm_start: Vec<WarmStartTrial>,
    /// Categorical parameter that gates the rest of the space: densities
    /// for the remaining parameters are fitted per branch.
    pub conditional_on: Option<String>,
    /// Penalize re-proposing near parameters whose trials are still in
    /// flight (parallel dispatch).
    pub constant_liar: bool,
}

impl Default for TpeOptions {
    fn default() -> Self {
        Self {
            n_startup_trials: 10,
            gamma: 0.25,
            n_candidates: 24,
            multivariate: false,
            prior_weight: 1.0,
            warm_start: Vec::new(),
            conditional_on: None,
            constant_liar: false,
        }
    }
}

/// One scored parameter assignment, borrowed from history or warm start.
struct Scored<'a> {
    params: &'a BTreeMap<String, ParamValue>,
    score: f64,
}

#[derive(Debug)]
pub struct TpeSampler {
    opts: TpeOptions,
    goal: Goal,
    /// Proposals not yet visible in history, used by the constant liar.
    in_flight: Vec<(u32, Params)>,
}

impl TpeSampler {
    pub fn new(opts: TpeOptions, goal: Goal) -> Self {
        Self {
            opts,
            goal,
            in_flight: Vec::new(),
        }
    }

    /// Split observations into (good, rest) under the goal direction.
    fn split<'a>(&self, mut obs: Vec<Scored<'a>>) -> (Vec<Scored<'a>>, Vec<Scored<'a>>) {
        obs.sort_by(|a, b| {
            let ord = a
                .score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal);
            match self.goal {
                Goal::Minimize => ord,
                Goal::Maximize => ord.reverse(),
            }
        });
        let n_good = ((self.opts.gamma * obs.len() as f64).ceil() as usize)
            .clamp(1, obs.len().saturating_sub(1).max(1));
        let rest = obs.split_off(n_good.min(obs.len()));
        (obs, rest)
    }

    /// Mix the uniform prior (density `uniform_density`) into a fitted
    /// log-density.
    fn mix_prior(&self, log_d: f64, n: usize, uniform_density: f64) -> f64 {
        let w = self.opts.prior_weight;
        if w <= 0.0 {
            return log_d;
        }
        let n = n as f64;
        ((n * log_d.exp() + w * uniform_density) / (n + w)).ln()
    }

    /// Numeric view of one parameter across a set of observations.
    /// Uniform and log-uniform values are normalized into `[0,1]`; integers
    /// stay on their raw scale.
    fn numeric_values(
        name: &str,
        dist: &Distribution,
        obs: &[Scored<'_>],
    ) -> Vec<f64> {
        obs.iter()
            .filter_map(|o| {
                let v = o.params.get(name)?;
                match dist {
                    Distribution::Int { .. } => v.as_f64(),
                    _ => dist.encode(name, v).ok(),
                }
            })
            .collect()
    }

    /// Propose one numeric parameter independently.
    fn propose_numeric(
        &self,
        name: &str,
        dist: &Distribution,
        good: &[Scored<'_>],
        rest: &[Scored<'_>],
        rng: &mut dyn RngCore,
    ) -> ParamValue {
        let good_vals = Self::numeric_values(name, dist, good);
        let rest_vals = Self::numeric_values(name, dist, rest);
        let l = LogDensity::fit(&good_vals);
        let g = LogDensity::fit(&rest_vals);

        let (lo, hi, uniform_density) = match dist {
            Distribution::Int { low, high } => {
                let span = (high - low + 1) as f64;
                (*low as f64, *high as f64, 1.0 / span)
            }
            _ => (0.0, 1.0, 1.0),
        };

        let mut best_u = None;
        let mut best_ei = f64::NEG_INFINITY;
        for _ in 0..self.opts.n_candidates.max(1) {
            let mut cand = match &l {
                LogDensity::Kde {
                    points, bandwidth, ..
                } => {
                    let idx = rng.gen_range(0..points.len());
                    points[idx] + bandwidth * gauss(rng)
                }
                LogDensity::Delta { center, .. } => *center,
                LogDensity::Constant => lo + rng.gen::<f64>() * (hi - lo),
            };
            cand = cand.clamp(lo, hi);
            if matches!(dist, Distribution::Int { .. }) {
                cand = cand.round();
            }

            let ll = self.mix_prior(l.log_density(cand), good_vals.len(), uniform_density);
            let lg = self.mix_prior(g.log_density(cand), rest_vals.len(), uniform_density);
            let ei = ll - lg;
            // Strict comparison: ties break toward the earliest candidate.
            if ei > best_ei {
                best_ei = ei;
                best_u = Some(cand);
            }
        }

        let chosen = best_u.unwrap_or(lo);
        match dist {
            Distribution::Int { low, high } => {
                ParamValue::Int((chosen as i64).clamp(*low, *high))
            }
            _ => dist.decode(chosen),
        }
    }

    /// Propose a categorical parameter from smoothed histograms.
    fn propose_categorical(
        &self,
        name: &str,
        choices: &[serde_json::Value],
        good: &[Scored<'_>],
        rest: &[Scored<'_>],
        rng: &mut dyn RngCore,
    ) -> ParamValue {
        let k = choices.len();
        let hist = |obs: &[Scored<'_>]| -> Vec<f64> {
            let mut counts = vec![self.opts.prior_weight.max(f64::EPSILON); k];
            for o in obs {
                if let Some(ParamValue::Json(v)) = o.params.get(name) {
                    if let Some(idx) = choices.iter().position(|c| c == v) {
                        counts[idx] += 1.0;
                    }
                }
            }
            let total: f64 = counts.iter().sum();
            counts.into_iter().map(|c| c / total).collect()
        };
        let l = hist(good);
        let g = hist(rest);

        // Draw candidates from l, rank by the EI surrogate, first-wins.
        let mut best_idx = 0usize;
        let mut best_ei = f64::NEG_INFINITY;
        for _ in 0..self.opts.n_candidates.max(1) {
            let mut u: f64 = rng.gen();
            let mut idx = k - 1;
            for (i, w) in l.iter().enumerate() {
                if u < *w {
                    idx = i;
                    break;
                }
                u -= w;
            }
            let ei = l[idx].ln() - g[idx].ln();
            if ei > best_ei {
                best_ei = ei;
                best_idx = idx;
            }
        }
        ParamValue::Json(choices[best_idx].clone())
    }

    /// Joint proposal over the numeric parameters (multivariate mode).
    fn propose_joint(
        &self,
        numeric: &[(String, Distribution)],
        good: &[Scored<'_>],
        rest: &[Scored<'_>],
        rng: &mut dyn RngCore,
        out: &mut Params,
    ) {
        let rows = |obs: &[Scored<'_>]| -> Vec<Vec<f64>> {
            obs.iter()
                .filter_map(|o| {
                    numeric
                        .iter()
                        .map(|(name, dist)| match dist {
                            Distribution::Int { .. } => o.params.get(name)?.as_f64(),
                            _ => dist.encode(name, o.params.get(name)?).ok(),
                        })
                        .collect::<Option<Vec<f64>>>()
                })
                .collect()
        };
        let good_rows = rows(good);
        let rest_rows = rows(rest);

        let l = JointKde::fit(&good_rows, numeric.len());
        let g = JointKde::fit(&rest_rows, numeric.len());

        let bounds: Vec<(f64, f64)> = numeric
            .iter()
            .map(|(_, d)| match d {
                Distribution::Int { low, high } => (*low as f64, *high as f64),
                _ => (0.0, 1.0),
            })
            .collect();

        let mut best: Option<Vec<f64>> = None;
        let mut best_ei = f64::NEG_INFINITY;
        for _ in 0..self.opts.n_candidates.max(1) {
            let cand: Vec<f64> = match l.sample(rng) {
                Some(c) => c,
                None => bounds
                    .iter()
                    .map(|(lo, hi)| lo + rng.gen::<f64>() * (hi - lo))
                    .collect(),
            };
            let cand: Vec<f64> = cand
                .iter()
                .zip(&bounds)
                .zip(numeric)
                .map(|((v, (lo, hi)), (_, dist))| {
                    let v = v.clamp(*lo, *hi);
                    if matches!(dist, Distribution::Int { .. }) {
                        v.round()
                    } else {
                        v
                    }
                })
                .collect();
            let ei = l.log_density(&cand) - g.log_density(&cand);
            if ei > best_ei {
                best_ei = ei;
                best = Some(cand);
            }
        }

        if let Some(cand) = best {
            for ((name, dist), v) in numeric.iter().zip(cand) {
                let value = match dist {
                    Distribution::Int { low, high } => {
                        ParamValue::Int((v as i64).clamp(*low, *high))
                    }
                    _ => dist.decode(v),
                };
                out.insert(name.clone(), value);
            }
        } else {
            for (name, dist) in numeric {
                out.insert(name.clone(), dist.decode(rng.gen()));
            }
        }
    }
}

impl Sampler for TpeSampler {
    fn next(
        &mut self,
        space: &SearchSpace,
        trial_index: u32,
        history: &[Trial],
        rng: &mut dyn RngCore,
    ) -> Result<Option<Params>, SamplerError> {
        let completed: Vec<&Trial> = history
            .iter()
            .filter(|t| t.status == TrialStatus::Completed && t.score.is_some())
            .collect();

        // Retire liar entries once their trial shows up in history.
        if self.opts.constant_liar {
            let known: std::collections::HashSet<u32> =
                history.iter().map(|t| t.number).collect();
            self.in_flight.retain(|(n, _)| !known.contains(n));
        }

        if completed.len() + self.opts.warm_start.len() < self.opts.n_startup_trials {
            let params = RandomSampler::draw(space, rng);
            if self.opts.constant_liar {
                self.in_flight.push((trial_index, params.clone()));
            }
            return Ok(Some(params));
        }

        // Pool local history with warm-start seeds. Unscored warm starts
        // rank as best so they land in the good set.
        let best_score = completed
            .iter()
            .filter_map(|t| t.score)
            .fold(f64::NAN, |acc, s| {
                if acc.is_nan() || self.goal.is_better(s, acc) {
                    s
                } else {
                    acc
                }
            });
        let worst_score = completed
            .iter()
            .filter_map(|t| t.score)
            .fold(f64::NAN, |acc, s| {
                if acc.is_nan() || self.goal.is_worse(s, acc) {
                    s
                } else {
                    acc
                }
            });

        let mut obs: Vec<Scored<'_>> = completed
            .iter()
            .map(|t| Scored {
                params: &t.params,
                score: t.score.unwrap_or(f64::INFINITY),
            })
            .collect();
        for w in &self.opts.warm_start {
            obs.push(Scored {
                params: &w.params,
                score: w.score.unwrap_or(best_score),
            });
        }
        let liar_params: Vec<Params> = if self.opts.constant_liar {
            self.in_flight.iter().map(|(_, p)| p.clone()).collect()
        } else {
            Vec::new()
        };

        let (good, mut rest) = self.split(obs);
        // The lie: in-flight proposals count as worst-case outcomes.
        for p in &liar_params {
            rest.push(Scored {
                params: p,
                score: worst_score,
            });
        }

        let mut params = Params::new();

        // Conditional gate: pick the branch first, then fit densities on
        // matching observations only.
        let gate = self.opts.conditional_on.clone();
        let (good, rest): (Vec<Scored<'_>>, Vec<Scored<'_>>) = if let Some(gate_name) = &gate {
            if let Some(Distribution::Categorical { choices }) = space.get(gate_name) {
                let value =
                    self.propose_categorical(gate_name, choices, &good, &rest, rng);
                let branch = value.clone();
                params.insert(gate_name.clone(), value);
                let keep = |o: &Scored<'_>| o.params.get(gate_name) == Some(&branch);
                (
                    good.into_iter().filter(|o| keep(o)).collect(),
                    rest.into_iter().filter(|o| keep(o)).collect(),
                )
            } else {
                (good, rest)
            }
        } else {
            (good, rest)
        };

        let remaining: Vec<&scout_types::ParamDef> = space
            .params
            .iter()
            .filter(|def| !params.contains_key(&def.name))
            .collect();

        if self.opts.multivariate {
            let numeric: Vec<(String, Distribution)> = remaining
                .iter()
                .filter(|def| !matches!(def.distribution, Distribution::Categorical { .. }))
                .map(|def| (def.name.clone(), def.distribution.clone()))
                .collect();
            if !numeric.is_empty() {
                self.propose_joint(&numeric, &good, &rest, rng, &mut params);
            }
            for def in &remaining {
                if let Distribution::Categorical { choices } = &def.distribution {
                    let value =
                        self.propose_categorical(&def.name, choices, &good, &rest, rng);
                    params.insert(def.name.clone(), value);
                }
            }
        } else {
            for def in &remaining {
                let value = match &def.distribution {
                    Distribution::Categorical { choices } => {
                        self.propose_categorical(&def.name, choices, &good, &rest, rng)
                    }
                    dist => self.propose_numeric(&def.name, dist, &good, &rest, rng),
                };
                params.insert(def.name.clone(), value);
            }
        }

        if self.opts.constant_liar {
            self.in_flight.push((trial_index, params.clone()));
        }
        Ok(Some(params))
    }

    fn name(&self) -> &str {
        "tpe"
    }
}

/// Product-kernel Gaussian KDE over several dimensions, used by the
/// multivariate option. Per-dimension Silverman bandwidths with a floor
/// that keeps degenerate dimensions sampleable.
struct JointKde {
    points: Vec<Vec<f64>>,
    bandwidths: Vec<f64>,
    log_norm: f64,
    dims: usize,
}

impl JointKde {
    fn fit(rows: &[Vec<f64>], dims: usize) -> Self {
        let n = rows.len();
        if n == 0 || dims == 0 {
            return Self {
                points: Vec::new(),
                bandwidths: Vec::new(),
                log_norm: 0.0,
                dims,
            };
        }
        let mut bandwidths = Vec::with_capacity(dims);
        for d in 0..dims {
            let column: Vec<f64> = rows.iter().map(|r| r[d]).collect();
            let (_, sd) = mean_std(&column);
            bandwidths.push((1.06 * sd * (n as f64).powf(-0.2)).max(1e-3));
        }
        let log_norm = -((n as f64).ln()
            + bandwidths.iter().map(|h| h.ln()).sum::<f64>()
            + dims as f64 * 0.5 * LN_2PI);
        Self {
            points: rows.to_vec(),
            bandwidths,
            log_norm,
            dims,
        }
    }

    fn log_density(&self, x: &[f64]) -> f64 {
        if self.points.is_empty() {
            return f64::EPSILON.ln();
        }
        let terms: Vec<f64> = self
            .points
            .iter()
            .map(|p| {
                (0..self.dims)
                    .map(|d| {
                        let z = (x[d] - p[d]) / self.bandwidths[d];
                        -0.5 * z * z
                    })
                    .sum::<f64>()
            })
            .collect();
        let v = scout_math::log_sum_exp(&terms) + self.log_norm;
        if v.is_finite() {
            v.max(f64::EPSILON.ln())
        } else {
            f64::EPSILON.ln()
        }
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Option<Vec<f64>> {
        if self.points.is_empty() {
            return None;
        }
        let idx = rng.gen_range(0..self.points.len());
        Some(
            (0..self.dims)
                .map(|d| self.points[idx][d] + self.bandwidths[d] * gauss(rng))
                .collect(),
        )
    }
}
