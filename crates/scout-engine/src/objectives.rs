//! Built-in benchmark objectives.
//!
//! Standard test functions used by the CLI, the integration tests and
//! anyone smoke-testing a sampler. Each takes the numeric parameters in
//! name order as its coordinate vector.

use std::sync::Arc;

use scout_types::ConfigError;

use crate::report::{Objective, TrialError};

/// `Σ x_i²`; global minimum 0 at the origin.
pub fn sphere(xs: &[f64]) -> f64 {
    xs.iter().map(|x| x * x).sum()
}

/// `Σ (1 − x_i)² + 100 (x_{i+1} − x_i²)²`; global minimum 0 at (1, …, 1).
pub fn rosenbrock(xs: &[f64]) -> f64 {
    xs.windows(2)
        .map(|w| {
            let (x, y) = (w[0], w[1]);
            (1.0 - x) * (1.0 - x) + 100.0 * (y - x * x) * (y - x * x)
        })
        .sum()
}

/// `10 d + Σ (x_i² − 10 cos(2π x_i))`; global minimum 0 at the origin.
pub fn rastrigin(xs: &[f64]) -> f64 {
    let d = xs.len() as f64;
    10.0 * d
        + xs.iter()
            .map(|x| x * x - 10.0 * (2.0 * std::f64::consts::PI * x).cos())
            .sum::<f64>()
}

/// `½ Σ (x_i⁴ − 16 x_i² + 5 x_i)`; global minimum ≈ −39.166 d at
/// x_i ≈ −2.9035.
pub fn styblinski_tang(xs: &[f64]) -> f64 {
    0.5 * xs
        .iter()
        .map(|x| x.powi(4) - 16.0 * x * x + 5.0 * x)
        .sum::<f64>()
}

/// Resolve a benchmark by name into an [`Objective`] over the trial's
/// numeric parameters (in name order). Unknown names are a configuration
/// error, matching the sampler/pruner whitelists.
pub fn builtin(name: &str) -> Result<Objective, ConfigError> {
    let f: fn(&[f64]) -> f64 = match name {
        "sphere" => sphere,
        "rosenbrock" => rosenbrock,
        "rastrigin" => rastrigin,
        "styblinski-tang" => styblinski_tang,
        other => {
            return Err(ConfigError::InvalidOption {
                name: "objective".to_string(),
                message: format!("unknown benchmark objective: {other}"),
            })
        }
    };
    Ok(Arc::new(move |handle| {
        let xs: Vec<f64> = handle
            .params()
            .values()
            .filter_map(|v| v.as_f64())
            .collect();
        if xs.is_empty() {
            return Err(TrialError::Failed(
                "benchmark objective needs at least one numeric parameter".to_string(),
            ));
        }
        Ok(f(&xs))
    }))
}
