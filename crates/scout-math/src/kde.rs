//! Gaussian kernel density estimation with Silverman bandwidth.
//!
//! The estimator returns **log**-densities. Every returned value is finite
//! and floored at `ln(ε)` for any finite query, for every input dataset —
//! empty, singleton, duplicated, or degenerate.

use crate::stats::{log_sum_exp, mean_std};

const LN_2PI: f64 = 1.8378770664093453;

/// Floor for all log-densities: `ln(f64::EPSILON)`.
pub fn log_floor() -> f64 {
    f64::EPSILON.ln()
}

/// A fitted log-density function over one real dimension.
#[derive(Debug, Clone)]
pub enum LogDensity {
    /// No data: constant `ln(ε)` everywhere.
    Constant,
    /// One point or zero variance: `0.0` within a tight radius of the
    /// center, `ln(ε)` elsewhere.
    Delta { center: f64, radius: f64 },
    /// A proper Gaussian mixture with one component per data point.
    Kde {
        points: Vec<f64>,
        bandwidth: f64,
        /// `-ln(n · h · √(2π))`, precomputed.
        log_norm: f64,
    },
}

impl LogDensity {
    /// Fit from raw points. Duplicates are kept; non-finite inputs are
    /// dropped before fitting.
    pub fn fit(points: &[f64]) -> Self {
        let points: Vec<f64> = points.iter().copied().filter(|x| x.is_finite()).collect();
        if points.is_empty() {
            return Self::Constant;
        }

        let (m, sd) = mean_std(&points);
        if points.len() == 1 || sd == 0.0 {
            let radius = f64::EPSILON.sqrt() * (1.0 + m.abs());
            return Self::Delta { center: m, radius };
        }

        // Silverman's rule, floored at machine epsilon.
        let n = points.len() as f64;
        let bandwidth = (1.06 * sd * n.powf(-0.2)).max(f64::EPSILON);
        let log_norm = -(n.ln() + bandwidth.ln() + 0.5 * LN_2PI);
        Self::Kde {
            points,
            bandwidth,
            log_norm,
        }
    }

    /// Log-density at `x`. Finite and `>= ln(ε)` for every finite `x`.
    pub fn log_density(&self, x: f64) -> f64 {
        let floor = log_floor();
        if !x.is_finite() {
            return floor;
        }
        match self {
            Self::Constant => floor,
            Self::Delta { center, radius } => {
                if (x - center).abs() <= *radius {
                    0.0
                } else {
                    floor
                }
            }
            Self::Kde {
                points,
                bandwidth,
                log_norm,
            } => {
                let terms: Vec<f64> = points
                    .iter()
                    .map(|p| {
                        let z = (x - p) / bandwidth;
                        -0.5 * z * z
                    })
                    .collect();
                let v = log_sum_exp(&terms) + log_norm;
                if v.is_finite() {
                    v.max(floor)
                } else {
                    floor
                }
            }
        }
    }

    /// The fitted data points, if any. Samplers draw candidates by picking
    /// a point and perturbing it by the bandwidth.
    pub fn points(&self) -> &[f64] {
        match self {
            Self::Kde { points, .. } => points,
            _ => &[],
        }
    }

    pub fn bandwidth(&self) -> f64 {
        match self {
            Self::Kde { bandwidth, .. } => *bandwidth,
            Self::Delta { radius, .. } => *radius,
            Self::Constant => 0.0,
        }
    }

    /// Center for the degenerate cases, used as the candidate when the
    /// estimator has collapsed to a point.
    pub fn center(&self) -> Option<f64> {
        match self {
            Self::Delta { center, .. } => Some(*center),
            _ => None,
        }
    }
}
