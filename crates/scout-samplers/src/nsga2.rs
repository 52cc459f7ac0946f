//! NSGA-II genetic sampler.
//!
//! Completed trials form the parent population; parents are ranked by fast
//! non-dominated sorting with crowding-distance tie-breaks, selected by
//! binary tournament, and recombined with simulated binary crossover plus
//! polynomial mutation. With the single-score store the objective vector
//! has one component, so the fronts degenerate gracefully to score order
//! while the full machinery stays exercised.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use scout_types::{Distribution, Goal, ParamValue, SamplerError, SearchSpace, Trial, TrialStatus};

use crate::random::RandomSampler;
use crate::{Params, Sampler};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Nsga2Options {
    pub population_size: usize,
    pub crossover_prob: f64,
    /// SBX distribution index; larger values keep children closer to the
    /// parents.
    pub eta_crossover: f64,
    /// Polynomial-mutation distribution index.
    pub eta_mutation: f64,
    /// Per-parameter mutation probability; default `1 / n_params`.
    pub mutation_prob: Option<f64>,
}

impl Default for Nsga2Options {
    fn default() -> Self {
        Self {
            population_size: 50,
            crossover_prob: 0.9,
            eta_crossover: 20.0,
            eta_mutation: 20.0,
            mutation_prob: None,
        }
    }
}

/// `a` dominates `b` when it is no worse in every objective and strictly
/// better in at least one. Objectives are internally minimized.
fn dominates(a: &[f64], b: &[f64]) -> bool {
    let mut strictly = false;
    for (x, y) in a.iter().zip(b) {
        if x > y {
            return false;
        }
        if x < y {
            strictly = true;
        }
    }
    strictly
}

/// Fast non-dominated sort; returns the front index of each individual.
fn non_dominated_rank(objectives: &[Vec<f64>]) -> Vec<usize> {
    let n = objectives.len();
    let mut dominated_by = vec![0usize; n];
    let mut dominates_list: Vec<Vec<usize>> = vec![Vec::new(); n];
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            if dominates(&objectives[i], &objectives[j]) {
                dominates_list[i].push(j);
            } else if dominates(&objectives[j], &objectives[i]) {
                dominated_by[i] += 1;
            }
        }
    }

    let mut rank = vec![0usize; n];
    let mut front: Vec<usize> = (0..n).filter(|&i| dominated_by[i] == 0).collect();
    let mut level = 0;
    while !front.is_empty() {
        let mut next = Vec::new();
        for &i in &front {
            rank[i] = level;
            for &j in &dominates_list[i] {
                dominated_by[j] -= 1;
                if dominated_by[j] == 0 {
                    next.push(j);
                }
            }
        }
        front = next;
        level += 1;
    }
    rank
}

/// Crowding distance within one front.
fn crowding_distance(objectives: &[Vec<f64>], members: &[usize]) -> Vec<f64> {
    let m = members.len();
    let mut distance = vec![0.0f64; m];
    if m == 0 {
        return distance;
    }
    let n_obj = objectives[members[0]].len();
    for obj in 0..n_obj {
        let mut order: Vec<usize> = (0..m).collect();
        order.sort_by(|&a, &b| {
            objectives[members[a]][obj]
                .partial_cmp(&objectives[members[b]][obj])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        distance[order[0]] = f64::INFINITY;
        distance[order[m - 1]] = f64::INFINITY;
        let span = objectives[members[order[m - 1]]][obj] - objectives[members[order[0]]][obj];
        if span <= 0.0 {
            continue;
        }
        for w in 1..m - 1 {
            let lo = objectives[members[order[w - 1]]][obj];
            let hi = objectives[members[order[w + 1]]][obj];
            distance[order[w]] += (hi - lo) / span;
        }
    }
    distance
}

#[derive(Debug)]
pub struct Nsga2Sampler {
    opts: Nsga2Options,
    goal: Goal,
}

impl Nsga2Sampler {
    pub fn new(opts: Nsga2Options, goal: Goal) -> Self {
        Self { opts, goal }
    }

    /// Objective vector of one completed trial, minimized internally.
    fn objectives(&self, trial: &Trial) -> Option<Vec<f64>> {
        let score = trial.score?;
        let score = match self.goal {
            Goal::Minimize => score,
            Goal::Maximize => -score,
        };
        Some(vec![score])
    }

    /// Binary tournament on (rank, crowding).
    fn tournament(
        &self,
        rng: &mut dyn RngCore,
        n: usize,
        rank: &[usize],
        crowding: &[f64],
    ) -> usize {
        let a = rng.gen_range(0..n);
        let b = rng.gen_range(0..n);
        if rank[a] < rank[b] {
            a
        } else if rank[b] < rank[a] {
            b
        } else if crowding[a] >= crowding[b] {
            a
        } else {
            b
        }
    }

    /// Simulated binary crossover on one normalized coordinate.
    fn sbx(&self, x1: f64, x2: f64, rng: &mut dyn RngCore) -> (f64, f64) {
        let u: f64 = rng.gen();
        let eta = self.opts.eta_crossover;
        let beta = if u <= 0.5 {
            (2.0 * u).powf(1.0 / (eta + 1.0))
        } else {
            (1.0 / (2.0 * (1.0 - u))).powf(1.0 / (eta + 1.0))
        };
        let c1 = 0.5 * ((1.0 + beta) * x1 + (1.0 - beta) * x2);
        let c2 = 0.5 * ((1.0 - beta) * x1 + (1.0 + beta) * x2);
        (c1.clamp(0.0, 1.0), c2.clamp(0.0, 1.0))
    }

    /// Polynomial mutation on one normalized coordinate.
    fn polynomial_mutation(&self, x: f64, rng: &mut dyn RngCore) -> f64 {
        let u: f64 = rng.gen();
        let eta = self.opts.eta_mutation;
        let delta = if u < 0.5 {
            (2.0 * u).powf(1.0 / (eta + 1.0)) - 1.0
        } else {
            1.0 - (2.0 * (1.0 - u)).powf(1.0 / (eta + 1.0))
        };
        (x + delta).clamp(0.0, 1.0)
    }
}

impl Sampler for Nsga2Sampler {
    fn next(
        &mut self,
        space: &SearchSpace,
        _trial_index: u32,
        history: &[Trial],
        rng: &mut dyn RngCore,
    ) -> Result<Option<Params>, SamplerError> {
        let parents: Vec<&Trial> = history
            .iter()
            .filter(|t| t.status == TrialStatus::Completed && t.score.is_some())
            .collect();

        // Initial population is random.
        if parents.len() < self.opts.population_size.max(2) {
            return Ok(Some(RandomSampler::draw(space, rng)));
        }

        // Keep the most recent `population_size` completed trials as the
        // breeding pool.
        let pool: Vec<&Trial> = parents
            .iter()
            .rev()
            .take(self.opts.population_size)
            .copied()
            .collect();
        let objectives: Vec<Vec<f64>> = pool
            .iter()
            .map(|t| self.objectives(t).unwrap_or_else(|| vec![f64::INFINITY]))
            .collect();

        let rank = non_dominated_rank(&objectives);
        // Crowding is computed per front, then scattered back.
        let mut crowding = vec![0.0f64; pool.len()];
        let max_rank = rank.iter().copied().max().unwrap_or(0);
        for level in 0..=max_rank {
            let members: Vec<usize> = (0..pool.len()).filter(|&i| rank[i] == level).collect();
            let dist = crowding_distance(&objectives, &members);
            for (k, &i) in members.iter().enumerate() {
                crowding[i] = dist[k];
            }
        }

        let p1 = self.tournament(rng, pool.len(), &rank, &crowding);
        let p2 = self.tournament(rng, pool.len(), &rank, &crowding);

        let mutation_prob = self
            .opts
            .mutation_prob
            .unwrap_or(1.0 / space.len().max(1) as f64);
        let do_crossover = rng.gen::<f64>() < self.opts.crossover_prob;

        let mut child = Params::new();
        for def in &space.params {
            let v1 = pool[p1].params.get(&def.name);
            let v2 = pool[p2].params.get(&def.name);
            let value = match &def.distribution {
                Distribution::Categorical { choices } => {
                    // Uniform crossover; mutation re-rolls the choice.
                    let inherited = if rng.gen::<bool>() { v1 } else { v2 };
                    let mutate = rng.gen::<f64>() < mutation_prob;
                    match (inherited, mutate) {
                        (Some(v), false) if def.distribution.contains(v) => v.clone(),
                        _ => {
                            let idx = rng.gen_range(0..choices.len());
                            ParamValue::Json(choices[idx].clone())
                        }
                    }
                }
                dist => {
                    let u1 = v1.and_then(|v| dist.encode(&def.name, v).ok());
                    let u2 = v2.and_then(|v| dist.encode(&def.name, v).ok());
                    let (u1, u2) = match (u1, u2) {
                        (Some(a), Some(b)) => (a, b),
                        _ => (rng.gen(), rng.gen()),
                    };
                    let mut u = if do_crossover {
                        let (c1, c2) = self.sbx(u1, u2, rng);
                        if rng.gen::<bool>() {
                            c1
                        } else {
                            c2
                        }
                    } else {
                        u1
                    };
                    if rng.gen::<f64>() < mutation_prob {
                        u = self.polynomial_mutation(u, rng);
                    }
                    dist.decode(u)
                }
            };
            child.insert(def.name.clone(), value);
        }
        Ok(Some(child))
    }

    fn name(&self) -> &str {
        "nsga2"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use scout_types::derive_seed;
    use std::collections::BTreeMap;

    #[test]
    fn dominance_is_strict() {
        assert!(dominates(&[1.0, 1.0], &[2.0, 2.0]));
        assert!(dominates(&[1.0, 2.0], &[2.0, 2.0]));
        assert!(!dominates(&[1.0, 3.0], &[2.0, 2.0]));
        assert!(!dominates(&[1.0], &[1.0]));
    }

    #[test]
    fn rank_orders_fronts() {
        let objectives = vec![
            vec![1.0, 4.0],
            vec![4.0, 1.0],
            vec![2.0, 2.0],
            vec![5.0, 5.0],
        ];
        let rank = non_dominated_rank(&objectives);
        assert_eq!(rank[0], 0);
        assert_eq!(rank[1], 0);
        assert_eq!(rank[2], 0);
        assert_eq!(rank[3], 1);
    }

    #[test]
    fn crowding_rewards_boundary_points() {
        let objectives = vec![vec![1.0], vec![2.0], vec![10.0]];
        let members = vec![0, 1, 2];
        let dist = crowding_distance(&objectives, &members);
        assert!(dist[0].is_infinite());
        assert!(dist[2].is_infinite());
        assert!(dist[1].is_finite());
    }

    fn completed(number: u32, x: f64, score: f64) -> Trial {
        let mut t = Trial::new(
            "ga",
            number,
            BTreeMap::from([("x".to_string(), ParamValue::Float(x))]),
            derive_seed("ga", number, 0),
        );
        t.mark_running();
        t.mark_completed(score);
        t
    }

    #[test]
    fn random_until_population_filled() {
        let space = SearchSpace::new().add_uniform("x", 0.0, 1.0);
        let mut ga = Nsga2Sampler::new(
            Nsga2Options {
                population_size: 10,
                ..Nsga2Options::default()
            },
            Goal::Minimize,
        );
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let history: Vec<Trial> = (0..3).map(|i| completed(i, 0.5, 1.0)).collect();
        assert!(ga.next(&space, 3, &history, &mut rng).unwrap().is_some());
    }

    #[test]
    fn offspring_lean_toward_fit_parents() {
        let space = SearchSpace::new().add_uniform("x", 0.0, 1.0);
        let mut ga = Nsga2Sampler::new(
            Nsga2Options {
                population_size: 20,
                ..Nsga2Options::default()
            },
            Goal::Minimize,
        );
        // Fitness favors x near 0.2.
        let history: Vec<Trial> = (0..20)
            .map(|i| {
                let x = i as f64 / 19.0;
                completed(i, x, (x - 0.2).abs())
            })
            .collect();

        let mut near = 0;
        for i in 0..60 {
            let mut rng = ChaCha8Rng::seed_from_u64(i);
            let child = ga.next(&space, 20, &history, &mut rng).unwrap().unwrap();
            if let Some(ParamValue::Float(v)) = child.get("x") {
                if (v - 0.2).abs() < 0.3 {
                    near += 1;
                }
            }
        }
        assert!(near > 30, "only {near}/60 offspring near fit region");
    }

    #[test]
    fn child_stays_in_bounds_for_every_kind() {
        let space = SearchSpace::new()
            .add_uniform("x", -1.0, 1.0)
            .add_int("n", 1, 4)
            .add_categorical("c", vec![serde_json::json!(1), serde_json::json!(2)]);
        let mut ga = Nsga2Sampler::new(
            Nsga2Options {
                population_size: 5,
                ..Nsga2Options::default()
            },
            Goal::Minimize,
        );
        let history: Vec<Trial> = (0..6)
            .map(|i| {
                let mut t = Trial::new(
                    "ga",
                    i,
                    BTreeMap::from([
                        ("x".to_string(), ParamValue::Float(-1.0 + 0.3 * i as f64)),
                        ("n".to_string(), ParamValue::Int(1 + (i % 4) as i64)),
                        ("c".to_string(), ParamValue::Json(serde_json::json!(1))),
                    ]),
                    derive_seed("ga", i, 0),
                );
                t.mark_running();
                t.mark_completed(i as f64);
                t
            })
            .collect();

        for i in 0..40 {
            let mut rng = ChaCha8Rng::seed_from_u64(100 + i);
            let child = ga.next(&space, 6, &history, &mut rng).unwrap().unwrap();
            match child.get("x") {
                Some(ParamValue::Float(v)) => assert!((-1.0..=1.0).contains(v)),
                other => panic!("unexpected x: {other:?}"),
            }
            match child.get("n") {
                Some(ParamValue::Int(v)) => assert!((1..=4).contains(v)),
                other => panic!("unexpected n: {other:?}"),
            }
        }
    }
}
