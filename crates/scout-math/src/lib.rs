//! # scout-math
//!
//! The numerical kernel behind the samplers and pruners: a numerically
//! stable Gaussian KDE, the error function and normal CDF, percentiles with
//! linear interpolation, and tie-averaged rank statistics.

pub mod kde;
pub mod stats;

pub use kde::LogDensity;
pub use stats::{erf, log_sum_exp, mean, mean_std, median, normal_cdf, percentile, ranks};
