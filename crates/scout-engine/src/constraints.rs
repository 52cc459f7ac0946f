//! Feasibility constraints composed into the score by penalty.
//!
//! A constraint is a function `g(params) <= 0`; positive values measure the
//! violation. Single-objective samplers see the penalized score
//! `score + ρ · Σ max(0, g_i)`, which also keeps infeasible trials out of
//! the best-trial pick.

use std::collections::BTreeMap;
use std::sync::Arc;

use scout_types::ParamValue;

pub type ConstraintFn =
    Arc<dyn Fn(&BTreeMap<String, ParamValue>) -> f64 + Send + Sync>;

#[derive(Clone, Default)]
pub struct ConstraintSet {
    constraints: Vec<ConstraintFn>,
    rho: f64,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self {
            constraints: Vec::new(),
            rho: 1e3,
        }
    }

    /// Penalty weight; defaults to 1e3.
    pub fn with_rho(mut self, rho: f64) -> Self {
        self.rho = rho;
        self
    }

    pub fn add(
        mut self,
        g: impl Fn(&BTreeMap<String, ParamValue>) -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.constraints.push(Arc::new(g));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Total violation `Σ max(0, g_i)`; 0.0 when feasible.
    pub fn violation(&self, params: &BTreeMap<String, ParamValue>) -> f64 {
        self.constraints
            .iter()
            .map(|g| g(params).max(0.0))
            .sum()
    }

    /// Penalized score under the study goal: violations always push the
    /// score toward the worse side.
    pub fn apply(&self, params: &BTreeMap<String, ParamValue>, score: f64, maximize: bool) -> f64 {
        if self.constraints.is_empty() {
            return score;
        }
        let penalty = self.rho * self.violation(params);
        if maximize {
            score - penalty
        } else {
            score + penalty
        }
    }
}

impl std::fmt::Debug for ConstraintSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstraintSet")
            .field("n", &self.constraints.len())
            .field("rho", &self.rho)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_with_x(x: f64) -> BTreeMap<String, ParamValue> {
        BTreeMap::from([("x".to_string(), ParamValue::Float(x))])
    }

    #[test]
    fn feasible_points_pass_through() {
        let set = ConstraintSet::new().add(|p| p["x"].as_f64().unwrap() - 1.0);
        assert_eq!(set.violation(&params_with_x(0.5)), 0.0);
        assert_eq!(set.apply(&params_with_x(0.5), 3.0, false), 3.0);
    }

    #[test]
    fn violations_are_penalized_toward_worse() {
        let set = ConstraintSet::new()
            .with_rho(10.0)
            .add(|p| p["x"].as_f64().unwrap() - 1.0);
        // x = 2 violates by 1.0.
        assert_eq!(set.apply(&params_with_x(2.0), 3.0, false), 13.0);
        assert_eq!(set.apply(&params_with_x(2.0), 3.0, true), -7.0);
    }

    #[test]
    fn multiple_constraints_sum() {
        let set = ConstraintSet::new()
            .with_rho(1.0)
            .add(|p| p["x"].as_f64().unwrap())
            .add(|p| p["x"].as_f64().unwrap() * 2.0);
        assert_eq!(set.violation(&params_with_x(1.0)), 3.0);
    }
}
